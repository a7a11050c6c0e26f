// Shared fixtures for the lsmdb integration tests

use lsmdb::{Database, DatabaseOptions, Value};
use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary database directory that lives as long as the fixture.
pub struct DbFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl DbFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("db");
        Self { temp_dir, path }
    }

    /// Constructed and opened handle with `options`.
    pub fn open(&self, options: DatabaseOptions) -> Database {
        Database::connect(&self.path, options).expect("Failed to open database")
    }

    /// Open text handle.
    #[allow(dead_code)]
    pub fn text(&self) -> Database {
        self.open(DatabaseOptions::text())
    }

    /// Open binary handle.
    #[allow(dead_code)]
    pub fn binary(&self) -> Database {
        self.open(DatabaseOptions::default())
    }
}

/// Text handle holding `k1..=k{n}` (zero padded to two digits) with values `v1..`.
#[allow(dead_code)]
pub fn numbered(fixture: &DbFixture, n: usize) -> Database {
    let db = fixture.text();
    db.update((1..=n).map(|i| (format!("k{:02}", i), format!("v{}", i))))
        .expect("Failed to fill database");
    db
}

/// Keys of `(key, value)` results, as strings.
#[allow(dead_code)]
pub fn keys_of<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = lsmdb::Result<(Value, Value)>>,
{
    items
        .into_iter()
        .map(|item| {
            item.expect("Failed to read item")
                .0
                .into_text()
                .expect("Expected a text key")
        })
        .collect()
}
