//! # lsmdb WAL (Write-Ahead Log)
//!
//! Durable log of the changes held in the engine's in-memory tree. Frames
//! are checksummed, segments rotate at a size limit, and replay after a
//! crash keeps only committed groups.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of lsmdb.**
//!
//! Users should depend on the main [`lsmdb`](https://crates.io/crates/lsmdb) crate
//! instead. This crate's API may change without notice between minor versions.

use lsmdb_core::{EngineError, EngineResult, Safety};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod reader;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod writer;

pub use reader::WalReader;
pub use record::{FrameError, RecordType, WalRecord};
pub use recovery::{RecoveryManager, RecoveryStats};
pub use segment::{SegmentInfo, SegmentManager};
pub use writer::WalWriter;

/// Log configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// When appended frames reach the disk
    pub sync_mode: SyncMode,
    /// Segment size in bytes before rotation
    pub max_segment_size: u64,
    /// Directory holding the segments
    pub wal_dir: PathBuf,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Async,
            max_segment_size: 16 * 1024 * 1024,
            wal_dir: PathBuf::from("wal"),
        }
    }
}

/// When appended frames are forced to disk. Every mode writes each
/// appended record (or group) through to the OS before returning, so a
/// process crash never loses it; the modes differ only in fsync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync after every append
    Sync,
    /// fsync only on explicit [`WalManager::sync`] and at rotation
    Async,
    /// never fsync
    None,
}

impl From<Safety> for SyncMode {
    fn from(safety: Safety) -> Self {
        match safety {
            Safety::Off => SyncMode::None,
            Safety::Normal => SyncMode::Async,
            Safety::Full => SyncMode::Sync,
        }
    }
}

/// Owns the log writer of one store.
pub struct WalManager {
    config: WalConfig,
    writer: Option<WalWriter>,
    next_tx_id: u64,
}

impl WalManager {
    pub fn new(config: WalConfig) -> Self {
        Self {
            config,
            writer: None,
            next_tx_id: 1,
        }
    }

    /// Open the newest segment for appending.
    pub fn open(&mut self) -> EngineResult<()> {
        let writer = WalWriter::new(
            &self.config.wal_dir,
            self.config.max_segment_size,
            self.config.sync_mode,
        )?;
        self.writer = Some(writer);
        Ok(())
    }

    fn writer(&mut self) -> EngineResult<&mut WalWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| EngineError::misuse("log is not open"))
    }

    /// Append one record.
    pub fn append(&mut self, record: &WalRecord) -> EngineResult<u64> {
        self.writer()?.append(record)
    }

    /// Append `records` wrapped in a BeginTx/CommitTx pair so that replay
    /// applies all of them or none. Returns the group id.
    pub fn append_group(&mut self, records: &[WalRecord]) -> EngineResult<u64> {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;

        let mut framed = Vec::with_capacity(records.len() + 2);
        framed.push(WalRecord::begin_tx(tx_id));
        framed.extend(records.iter().cloned());
        framed.push(WalRecord::commit_tx(tx_id));
        self.writer()?.append_batch(&framed)?;
        Ok(tx_id)
    }

    pub fn sync(&mut self) -> EngineResult<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Drop every segment and start a fresh one. Called once the logged
    /// changes are safely in table files.
    pub fn truncate(&mut self) -> EngineResult<()> {
        let was_open = self.writer.is_some();
        if let Some(mut writer) = self.writer.take() {
            writer.sync()?;
        }
        self.segment_manager().cleanup_all()?;
        if was_open {
            self.open()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> EngineResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Committed mutations, in log order.
    pub fn recover(&self) -> EngineResult<Vec<WalRecord>> {
        RecoveryManager::new(self.config.wal_dir.clone()).recover()
    }

    pub fn stats(&self) -> EngineResult<RecoveryStats> {
        RecoveryManager::new(self.config.wal_dir.clone())
            .recover_with_stats()
            .map(|(_, stats)| stats)
    }

    pub fn segment_manager(&self) -> SegmentManager {
        SegmentManager::new(self.config.wal_dir.clone())
    }

    /// Frame bytes appended since the log was opened.
    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map(|w| w.bytes_written()).unwrap_or(0)
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}
