#![no_main]

use libfuzzer_sys::fuzz_target;
use lsmdb_wal::WalRecord;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Walk the buffer frame by frame; decoding must never panic
    let mut rest = data;
    while let Ok((record, used)) = WalRecord::decode(rest) {
        let _ = record.record_type();
        if used == 0 || used > rest.len() {
            break;
        }
        rest = &rest[used..];
    }
});
