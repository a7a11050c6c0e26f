// Shared fixtures for the log integration tests

use lsmdb_wal::{SyncMode, WalConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary log directory that lives as long as the fixture.
pub struct WalTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub wal_path: PathBuf,
}

impl WalTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let wal_path = temp_dir.path().join("wal");
        fs::create_dir_all(&wal_path).expect("Failed to create WAL directory");

        Self { temp_dir, wal_path }
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_path
    }

    pub fn config(&self, sync_mode: SyncMode) -> WalConfig {
        WalConfig {
            wal_dir: self.wal_path.clone(),
            sync_mode,
            max_segment_size: 1024 * 1024,
        }
    }

    #[allow(dead_code)]
    pub fn list_segments(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.wal_path)
            .expect("Failed to read WAL directory")
            .filter_map(|entry| {
                entry
                    .ok()
                    .and_then(|e| e.file_name().to_str().map(String::from))
            })
            .collect();
        names.sort();
        names
    }

    /// Cut the newest segment short by `bytes`.
    #[allow(dead_code)]
    pub fn chop_tail(&self, bytes: u64) {
        let last = self
            .list_segments()
            .pop()
            .expect("Expected at least one segment");
        let path = self.wal_path.join(last);
        let len = fs::metadata(&path).expect("Failed to stat segment").len();
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("Failed to open segment");
        file.set_len(len.saturating_sub(bytes))
            .expect("Failed to truncate segment");
    }
}

impl Default for WalTestFixture {
    fn default() -> Self {
        Self::new()
    }
}
