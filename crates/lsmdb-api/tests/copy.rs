//! Copying and recompressing stores.

mod common;

use common::{numbered, DbFixture};
use lsmdb::{copy_database, Compression, CopyOptions, DatabaseOptions, Error};

#[test]
fn test_copy_into_compressed_store() {
    let source_fixture = DbFixture::new();
    let source = numbered(&source_fixture, 250);

    let dest_fixture = DbFixture::new();
    let dest = dest_fixture.open(DatabaseOptions::text().compression(Compression::Zstd));

    let options = CopyOptions {
        batch_size: 64,
        verify: true,
    };
    let report = copy_database(&source, &dest, options).unwrap();
    assert_eq!(report.copied, 250);
    assert!(report.verified);
    assert_eq!(dest.get("k123").unwrap(), "v123");
    assert_eq!(dest.tx_level(), 0);
}

#[test]
fn test_copy_between_representations() {
    let source_fixture = DbFixture::new();
    let source = numbered(&source_fixture, 5);
    let dest_fixture = DbFixture::new();
    let dest = dest_fixture.binary();

    let report = copy_database(&source, &dest, CopyOptions::default()).unwrap();
    assert_eq!(report.copied, 5);
    assert!(!report.verified);
    assert_eq!(dest.get(b"k03").unwrap(), b"v3");
}

#[test]
fn test_copy_rejects_readonly_destination() {
    let source_fixture = DbFixture::new();
    let source = numbered(&source_fixture, 2);

    let dest_fixture = DbFixture::new();
    dest_fixture.text().close().unwrap();
    let dest = dest_fixture.open(DatabaseOptions::text().readonly(true));

    let err = copy_database(&source, &dest, CopyOptions::default()).unwrap_err();
    assert!(matches!(err, Error::ReadOnly));
}

#[test]
fn test_copy_empty_store() {
    let source_fixture = DbFixture::new();
    let source = source_fixture.text();
    let dest_fixture = DbFixture::new();
    let dest = dest_fixture.text();
    let report = copy_database(
        &source,
        &dest,
        CopyOptions {
            verify: true,
            ..CopyOptions::default()
        },
    )
    .unwrap();
    assert_eq!(report.copied, 0);
    assert!(report.verified);
}
