// Shared fixtures for the storage integration tests

use lsmdb_core::{Engine, EngineOption, Safety};
use lsmdb_storage::LsmEngine;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary store directory that lives as long as the fixture.
pub struct StoreFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub store_path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store_path = temp_dir.path().join("store");
        Self {
            temp_dir,
            store_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    /// Engine configured with `options` on top of quiet defaults (no
    /// automatic flushing or merging) and opened on the fixture path.
    pub fn open(&self, options: &[EngineOption]) -> LsmEngine {
        let mut engine = LsmEngine::new();
        engine
            .configure(EngineOption::AutoFlush(0))
            .expect("Failed to configure");
        engine
            .configure(EngineOption::AutoWork(false))
            .expect("Failed to configure");
        engine
            .configure(EngineOption::Safety(Safety::Full))
            .expect("Failed to configure");
        for option in options {
            engine.configure(*option).expect("Failed to configure");
        }
        engine.open(&self.store_path).expect("Failed to open store");
        engine
    }

    #[allow(dead_code)]
    pub fn table_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.store_path)
            .expect("Failed to read store directory")
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().to_string();
                name.ends_with(".sst").then_some(name)
            })
            .collect();
        names.sort();
        names
    }
}

/// Every live (key, value) pair, in key order.
#[allow(dead_code)]
pub fn scan(engine: &mut LsmEngine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let csr = engine.csr_open().expect("Failed to open cursor");
    engine.csr_first(csr).expect("Failed to position cursor");
    let mut pairs = Vec::new();
    while engine.csr_valid(csr) {
        pairs.push((
            engine.csr_key(csr).expect("Failed to read key"),
            engine.csr_value(csr).expect("Failed to read value"),
        ));
        engine.csr_next(csr).expect("Failed to step cursor");
    }
    engine.csr_close(csr).expect("Failed to close cursor");
    pairs
}

/// Value of `key`, if live.
#[allow(dead_code)]
pub fn get(engine: &mut LsmEngine, key: &[u8]) -> Option<Vec<u8>> {
    let csr = engine.csr_open().expect("Failed to open cursor");
    engine
        .csr_seek(csr, key, lsmdb_core::SeekMode::Eq)
        .expect("Failed to seek");
    let value = if engine.csr_valid(csr) {
        Some(engine.csr_value(csr).expect("Failed to read value"))
    } else {
        None
    };
    engine.csr_close(csr).expect("Failed to close cursor");
    value
}

#[allow(dead_code)]
pub fn kv(key: &str, value: &str) -> (Vec<u8>, Vec<u8>) {
    (key.as_bytes().to_vec(), value.as_bytes().to_vec())
}
