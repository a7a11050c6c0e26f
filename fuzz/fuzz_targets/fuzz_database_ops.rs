#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lsmdb::{Database, DatabaseOptions, KeyRange, SeekMode};

#[derive(Arbitrary, Debug)]
enum DbOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Seek { key: Vec<u8>, mode: u8 },
    Delete { key: Vec<u8> },
    DeleteRange { start: Vec<u8>, end: Vec<u8> },
    Slice { start: Option<Vec<u8>>, stop: Option<Vec<u8>>, step: i8 },
    Begin,
    Commit,
    Rollback,
    Flush,
    Work,
}

fn mode(code: u8) -> SeekMode {
    match code % 4 {
        0 => SeekMode::Eq,
        1 => SeekMode::Le,
        2 => SeekMode::Ge,
        _ => SeekMode::GeFast,
    }
}

fuzz_target!(|ops: Vec<DbOp>| {
    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let options = DatabaseOptions::default().autoflush(4);
    let Ok(db) = Database::connect(dir.path().join("db"), options) else {
        return;
    };
    for op in ops.iter().take(100) {
        // Limit operations and sizes to prevent timeout
        match op {
            DbOp::Put { key, value } if key.len() <= 1024 && value.len() <= 1024 => {
                let _ = db.insert(key.clone(), value.clone());
            }
            DbOp::Get { key } if key.len() <= 1024 => {
                let _ = db.get(key.clone());
            }
            DbOp::Seek { key, mode: code } if key.len() <= 1024 => {
                let _ = db.get_with(key.clone(), mode(*code));
            }
            DbOp::Delete { key } if key.len() <= 1024 => {
                let _ = db.delete(key.clone());
            }
            DbOp::DeleteRange { start, end } if start.len() <= 1024 && end.len() <= 1024 => {
                let _ = db.delete_range(start.clone(), end.clone());
            }
            DbOp::Slice { start, stop, step } => {
                let range = KeyRange {
                    start: start.clone().map(Into::into),
                    stop: stop.clone().map(Into::into),
                    step: Some(i64::from(*step)),
                };
                if let Ok(slice) = db.slice(range) {
                    let _ = slice.take(32).count();
                }
            }
            DbOp::Begin => {
                let _ = db.begin();
            }
            DbOp::Commit => {
                let _ = db.commit();
            }
            DbOp::Rollback => {
                let _ = db.rollback();
            }
            DbOp::Flush => {
                let _ = db.flush();
            }
            DbOp::Work => {
                let _ = db.work_with(Some(2), None, false);
            }
            _ => {}
        }
    }
    let _ = db.close();
});
