#![no_main]

use libfuzzer_sys::fuzz_target;
use lsmdb::{Database, DatabaseOptions};

fuzz_target!(|data: &[u8]| {
    // Test various key/value size combinations
    if data.len() < 4 {
        return;
    }

    let key_len = u16::from_le_bytes([data[0], data[1]]) as usize % 2048;
    let value_len = u16::from_le_bytes([data[2], data[3]]) as usize % 2048;

    if data.len() < 4 + key_len + value_len {
        return;
    }

    let key = &data[4..4 + key_len];
    let value = &data[4 + key_len..4 + key_len + value_len];

    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    if let Ok(db) = Database::connect(dir.path().join("db"), DatabaseOptions::default()) {
        let _ = db.insert(key, value);
        assert_eq!(db.get(key).ok().as_ref().map(|v| v.as_bytes()), Some(value));
        let _ = db.flush();
        assert_eq!(db.get(key).ok().as_ref().map(|v| v.as_bytes()), Some(value));
        let _ = db.remove(key);
        assert!(!db.contains(key).unwrap_or(true));

        // Empty key and value
        let _ = db.insert(b"", value);
        let _ = db.insert(key, b"");
        let _ = db.get(b"");
    }

    // Text handles must reject what is not UTF-8 without panicking
    if let Ok(text) = std::str::from_utf8(key) {
        let dir = tempfile::TempDir::new();
        if let Ok(dir) = dir {
            if let Ok(db) = Database::connect(dir.path().join("db"), DatabaseOptions::text()) {
                let _ = db.insert(text, text);
                let _ = db.get(text);
            }
        }
    }
});
