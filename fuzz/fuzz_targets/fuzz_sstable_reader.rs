#![no_main]

use libfuzzer_sys::fuzz_target;
use lsmdb_storage::sstable::{table_file_name, TableMeta, TableReader};

fuzz_target!(|data: &[u8]| {
    // Limit input size
    if data.len() > 10_000_000 {
        return;
    }

    // Write the bytes as a table file and read every block back
    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let file_name = table_file_name(1);
    if std::fs::write(dir.path().join(&file_name), data).is_err() {
        return;
    }
    let meta = TableMeta {
        id: 1,
        file_name,
        min_key: Vec::new(),
        max_key: Vec::new(),
        entry_count: 0,
        file_size: data.len() as u64,
        blocks: 0,
    };
    if let Ok(mut reader) = TableReader::open(dir.path(), meta, None) {
        for idx in 0..reader.block_count().min(64) {
            let _ = reader.block(idx);
        }
        let _ = reader.first();
        let _ = reader.last();
    }
});
