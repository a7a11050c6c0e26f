//! Handle lifecycle, mapping access and configuration.

mod common;

use common::{keys_of, numbered, DbFixture};
use lsmdb::{
    Assignment, Compression, Database, DatabaseOptions, DatabaseState, Error, ErrorKind, Fetched,
    KeyRange, Request, Safety, SeekMode, Value,
};
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn test_round_trip() {
    let fixture = DbFixture::new();
    let db = fixture.binary();
    db.insert(b"foo", b"bar").unwrap();
    assert_eq!(db.get(b"foo").unwrap(), b"bar");
    db.insert(b"foo", b"baz").unwrap();
    assert_eq!(db.get(b"foo").unwrap(), b"baz");
    assert_eq!(db.len().unwrap(), 1);
}

#[test]
fn test_missing_key() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    let err = db.get("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!db.contains("missing").unwrap());
    assert!(db.is_empty().unwrap());
}

#[test]
fn test_range_delete_is_half_open() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    db.update([("k1", "1"), ("k2", "2"), ("k3", "3")]).unwrap();
    db.delete_range("k1", "k3").unwrap();
    assert!(!db.contains("k1").unwrap());
    assert!(!db.contains("k2").unwrap());
    assert_eq!(db.get("k3").unwrap(), "3");
}

#[test]
fn test_directional_lookups() {
    let fixture = DbFixture::new();
    let db = numbered(&fixture, 5);
    assert_eq!(db.get_with("k025", SeekMode::Le).unwrap().unwrap(), "v2");
    assert_eq!(db.get_with("k025", SeekMode::Ge).unwrap().unwrap(), "v3");
    assert_eq!(db.get_with("k03", SeekMode::Eq).unwrap().unwrap(), "v3");
    assert!(db.get_with("k01", SeekMode::GeFast).unwrap().is_none());
    assert!(db.get_with("k99", SeekMode::Ge).unwrap_err().is_not_found());
    assert!(db.get_with("a", SeekMode::Le).unwrap_err().is_not_found());

    assert!(db.exists_from("k045").unwrap());
    assert!(!db.exists_from("k99").unwrap());
}

#[test]
fn test_set_and_remove() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    db.set("a", Some("1")).unwrap();
    assert_eq!(db.get("a").unwrap(), "1");
    db.set::<_, &str>("a", None).unwrap();
    assert!(!db.contains("a").unwrap());

    let err = db.remove("a").unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(ref key) if key == b"a"));
    // Plain delete does not care.
    db.delete("a").unwrap();
}

#[test]
fn test_remove_range_shapes() {
    let fixture = DbFixture::new();
    let db = numbered(&fixture, 6);
    assert!(matches!(
        db.remove_range(KeyRange::starting_at("k02")),
        Err(Error::Usage(_))
    ));
    assert!(matches!(
        db.remove_range(KeyRange::between("k02", "k04").step(2)),
        Err(Error::Usage(_))
    ));
    db.remove_range(KeyRange::between("k02", "k04")).unwrap();
    assert_eq!(keys_of(db.items().unwrap()), ["k01", "k04", "k05", "k06"]);
}

#[test]
fn test_fetch_and_assign() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    db.assign(Assignment::Put("a".into(), "1".into())).unwrap();
    db.assign(Assignment::Put("b".into(), "2".into())).unwrap();

    match db.fetch(Request::Key("a".into())).unwrap() {
        Fetched::Value(value) => assert_eq!(value, "1"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        db.fetch(Request::Seek("a".into(), SeekMode::GeFast)).unwrap(),
        Fetched::Exists
    ));
    match db.fetch(Request::Range(KeyRange::full())).unwrap() {
        Fetched::Slice(slice) => assert_eq!(slice.count(), 2),
        other => panic!("unexpected {:?}", other),
    }

    db.assign(Assignment::Remove("a".into())).unwrap();
    assert!(db.assign(Assignment::Remove("a".into())).unwrap_err().is_not_found());
    db.assign(Assignment::RemoveRange(KeyRange::between("a", "c")))
        .unwrap();
    assert!(db.is_empty().unwrap());
}

#[test]
fn test_update_counts_entries() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    let written = db
        .update(vec![("x".to_string(), "1".to_string()), ("y".into(), "2".into())])
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(db.len().unwrap(), 2);

    // A bad entry is caught before anything is written.
    let mixed: Vec<(Value, Value)> = vec![("z".into(), "3".into()), (b"w".into(), "4".into())];
    assert!(matches!(db.update(mixed), Err(Error::Usage(_))));
    assert!(!db.contains("z").unwrap());
}

#[test]
fn test_text_mode_rejects_bytes() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    assert!(matches!(db.insert(b"k", b"v"), Err(Error::Usage(_))));
    let binary_fixture = DbFixture::new();
    let binary = binary_fixture.binary();
    assert!(matches!(binary.get("k"), Err(Error::Usage(_))));
}

#[test]
fn test_invalid_utf8_in_text_store_is_integrity() {
    let fixture = DbFixture::new();
    {
        let binary = fixture.binary();
        binary.insert(b"k", vec![0xff, 0xfe]).unwrap();
        binary.close().unwrap();
    }
    let text = fixture.text();
    assert_eq!(text.get("k").unwrap_err().kind(), ErrorKind::Integrity);
}

#[test]
fn test_lifecycle() {
    let fixture = DbFixture::new();
    let db = Database::new(&fixture.path, DatabaseOptions::text()).unwrap();
    assert_eq!(db.state(), DatabaseState::Initialized);
    assert!(!fixture.path.exists());

    db.open().unwrap();
    assert_eq!(db.state(), DatabaseState::Opened);
    assert!(matches!(db.open(), Err(Error::Usage(_))));

    db.close().unwrap();
    assert_eq!(db.state(), DatabaseState::Closed);
    assert!(matches!(db.close(), Err(Error::Usage(_))));
    assert!(matches!(db.open(), Err(Error::Usage(_))));
    assert!(matches!(db.get("a"), Err(Error::Usage(_))));
}

#[test]
fn test_data_survives_reopen() {
    let fixture = DbFixture::new();
    {
        let db = fixture.text();
        db.update((0..100).map(|i| (format!("key{:03}", i), format!("value{}", i))))
            .unwrap();
        db.close().unwrap();
    }
    {
        // Dropped without close: the last owner closes it.
        let db = fixture.text();
        db.insert("late", "entry").unwrap();
    }
    let db = fixture.text();
    assert_eq!(db.len().unwrap(), 101);
    assert_eq!(db.get("key042").unwrap(), "value42");
    assert_eq!(db.get("late").unwrap(), "entry");
}

#[test]
fn test_committed_writes_survive_abandoned_handle() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open(DatabaseOptions::text().safety(Safety::Normal));
        db.insert("single", "1").unwrap();
        let mut tx = db.transaction().unwrap();
        db.insert("grouped", "2").unwrap();
        tx.commit().unwrap();
        db.insert("pending", "3").unwrap();
        // Nothing gets closed or flushed on the way out.
        std::mem::forget(tx);
        std::mem::forget(db);
    }
    let db = fixture.text();
    assert_eq!(db.get("single").unwrap(), "1");
    assert_eq!(db.get("grouped").unwrap(), "2");
    assert!(!db.contains("pending").unwrap());
}

#[test]
fn test_close_rolls_back_open_transaction() {
    let fixture = DbFixture::new();
    {
        let db = fixture.text();
        db.insert("kept", "1").unwrap();
        db.begin().unwrap();
        db.insert("lost", "2").unwrap();
        db.close().unwrap();
    }
    let db = fixture.text();
    assert!(db.contains("kept").unwrap());
    assert!(!db.contains("lost").unwrap());
}

#[test]
fn test_configuration_errors() {
    let fixture = DbFixture::new();
    let construct = |options: DatabaseOptions| Database::new(&fixture.path, options);

    assert!(construct(DatabaseOptions::default().block_size(4096)).is_ok());
    let err = construct(DatabaseOptions::default().block_size(100)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(construct(DatabaseOptions::default().autocheckpoint(0)).is_err());
    assert!(construct(DatabaseOptions::default().autoflush(2_000_000)).is_err());
    // A level means nothing without a compressor.
    assert!(construct(DatabaseOptions::default().compress_level(3)).is_ok());
    assert!(construct(
        DatabaseOptions::default()
            .compression(Compression::Zstd)
            .compress_level(0)
    )
    .is_err());
    assert!(lsmdb::safety_from_code(7).is_err());
    assert!(!fixture.path.exists());
}

#[test]
fn test_readonly_handle() {
    let fixture = DbFixture::new();
    {
        let db = fixture.text();
        db.insert("a", "1").unwrap();
        db.close().unwrap();
    }
    let db = fixture.open(DatabaseOptions::text().readonly(true));
    assert_eq!(db.get("a").unwrap(), "1");
    assert!(matches!(db.insert("b", "2"), Err(Error::ReadOnly)));
    assert!(matches!(db.remove("a"), Err(Error::ReadOnly)));
    assert!(matches!(db.begin(), Err(Error::ReadOnly)));
    assert!(matches!(db.transaction(), Err(Error::ReadOnly)));
    assert!(matches!(db.flush(), Err(Error::ReadOnly)));
    assert_eq!(Error::ReadOnly.kind(), ErrorKind::Usage);

    let info = db.info().unwrap();
    assert!(info.nwrite.is_none());
    assert!(info.tree_size.is_none());
}

#[test]
fn test_readonly_missing_store() {
    let fixture = DbFixture::new();
    let db = Database::new(&fixture.path, DatabaseOptions::default().readonly(true)).unwrap();
    let err = db.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(db.state(), DatabaseState::Initialized);
}

#[test]
fn test_info_and_maintenance() {
    let fixture = DbFixture::new();
    let db = fixture.open(DatabaseOptions::text().autowork(false).safety(Safety::Full));
    for round in 0..3 {
        db.update((0..50).map(|i| (format!("r{}k{:02}", round, i), "x".repeat(64))))
            .unwrap();
        db.flush().unwrap();
    }
    let info = db.info().unwrap();
    assert!(info.nwrite.unwrap() > 0);
    assert!(info.checkpoint_size.is_some());

    let written = db.work_with(Some(2), None, true).unwrap();
    assert!(written > 0);
    assert_eq!(db.len().unwrap(), 150);
    db.checkpoint().unwrap();
    assert_eq!(db.info().unwrap().checkpoint_size, Some(0));
}

#[test]
fn test_compression_round_trip_and_mismatch() {
    let fixture = DbFixture::new();
    {
        let db = fixture.open(DatabaseOptions::text().compression(Compression::Lz4));
        db.update((0..200).map(|i| (format!("k{:04}", i), "payload ".repeat(20))))
            .unwrap();
        db.close().unwrap();
    }
    {
        let db = fixture.open(DatabaseOptions::text().compression(Compression::Lz4));
        assert_eq!(db.get("k0123").unwrap(), "payload ".repeat(20));
        assert_eq!(db.compression(), Compression::Lz4);
    }
    let db = Database::new(
        &fixture.path,
        DatabaseOptions::text().compression(Compression::Zstd),
    )
    .unwrap();
    assert_eq!(db.open().unwrap_err().kind(), ErrorKind::Integrity);
}

#[test]
fn test_engine_logger_receives_messages() {
    let fixture = DbFixture::new();
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let db = Database::with_logger(
        &fixture.path,
        DatabaseOptions::text(),
        Arc::new(move |message: &str, _status: Option<lsmdb::Status>| {
            sink.lock().unwrap().push(message.to_string());
        }),
    )
    .unwrap();
    db.open().unwrap();
    db.insert("a", "1").unwrap();
    db.flush().unwrap();
    assert!(messages
        .lock()
        .unwrap()
        .iter()
        .any(|m| m.starts_with("flushed")));
}

#[test]
fn test_session_closes() {
    let fixture = DbFixture::new();
    let db = Database::new(&fixture.path, DatabaseOptions::text()).unwrap();
    let count = db
        .session(|db| {
            db.begin()?;
            db.insert("a", "1")?;
            db.len()
        })
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(db.state(), DatabaseState::Closed);

    let failing = DbFixture::new();
    let db = Database::new(&failing.path, DatabaseOptions::text()).unwrap();
    let result: lsmdb::Result<()> = db.session(|db| {
        db.begin()?;
        db.insert("a", "1")?;
        Err(Error::usage("stop"))
    });
    assert!(result.is_err());
    let reopened = failing.text();
    assert!(!reopened.contains("a").unwrap());

    let committed = fixture.text();
    assert_eq!(committed.get("a").unwrap(), "1");
}

#[test]
fn test_shared_between_threads() {
    let fixture = DbFixture::new();
    let db = fixture.text();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    db.insert(format!("t{}:{:03}", t, i), format!("{}", i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.len().unwrap(), 400);
    assert_eq!(db.get("t3:099").unwrap(), "99");
}

#[test]
fn test_introspection() {
    let fixture = DbFixture::new();
    let db = fixture.open(DatabaseOptions::text().page_size(8192));
    assert_eq!(db.path(), fixture.path.as_path());
    assert_eq!(db.options().page_size, 8192);
    assert!(db.text_mode());
    assert_eq!(db.tx_level(), 0);
    let shown = format!("{:?}", db);
    assert!(shown.contains("Opened"));
}
