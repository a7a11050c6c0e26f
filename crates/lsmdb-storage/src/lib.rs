//! # lsmdb Storage Engine
//!
//! LSM-tree storage engine behind the [`lsmdb_core::Engine`] handle API.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of lsmdb.**
//!
//! Users should depend on the main [`lsmdb`](https://crates.io/crates/lsmdb) crate
//! instead, which provides the stable public API. This crate's API may change
//! without notice between minor versions.
//!
//! ```toml
//! # In your Cargo.toml - use the main crate, not this one:
//! [dependencies]
//! lsmdb = "0.3"
//! ```
//!
//! ---
//!
//! - **Memtable**: sorted in-memory tree of recent writes and tombstones
//! - **Write-ahead log**: every committed change, replayed on open
//! - **Tables**: immutable sorted files with optionally compressed blocks
//! - **Merge work**: folds adjacent tables together on request or after flushes
//! - **Manifest**: the list of live tables and the compressor they use
//! - **Savepoints**: nested write transactions with an undo log
//!
//! ## Layout
//!
//! ```text
//! <path>/
//!   MANIFEST          live tables, compressor id
//!   0000000000000001.sst
//!   wal/wal-0000000000000000.log
//! ```
//!
//! ```text
//! insert ─→ WAL ─→ Memtable ──flush──→ table ──work──→ merged table
//! ```

use lsmdb_core::{
    Compressor, CursorId, Engine, EngineError, EngineOption, EngineResult, InfoKind, LogCallback,
    Safety, SeekMode, Status,
};
use lsmdb_wal::{SyncMode, WalConfig, WalManager, WalRecord};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod compaction;
pub mod cursor;
pub mod manifest;
pub mod memtable;
pub mod savepoint;
pub mod sstable;

pub use compaction::{merge_tables, MergeStats, MergeTarget};
pub use cursor::{CursorState, CursorTable, MergedView};
pub use manifest::{Manifest, ManifestSnapshot};
pub use memtable::{Memtable, MemtableEntry};
pub use savepoint::Savepoints;
pub use sstable::{BlockEntry, TableMeta, TableReader, TableWriter};

const WAL_DIR: &str = "wal";

/// Tuning values pushed in through [`EngineOption`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Memtable size (KB) that triggers a flush; 0 disables it
    pub autoflush_kb: u32,
    /// Data block size of table files, in bytes
    pub page_size: u32,
    pub safety: Safety,
    /// Log segment size, in KB
    pub block_size_kb: u32,
    /// Run merge work after every flush
    pub autowork: bool,
    pub mmap: u32,
    pub use_log: bool,
    /// Tables merged per automatic pass
    pub automerge: u32,
    pub max_freelist: u32,
    pub multiple_processes: bool,
    /// KB of table writes between automatic checkpoints; 0 disables them
    pub autocheckpoint_kb: u32,
    pub readonly: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            autoflush_kb: 1024,
            page_size: 4096,
            safety: Safety::Normal,
            block_size_kb: 1024,
            autowork: true,
            mmap: 0,
            use_log: true,
            automerge: 4,
            max_freelist: 24,
            multiple_processes: true,
            autocheckpoint_kb: 2048,
            readonly: false,
        }
    }
}

impl EngineSettings {
    pub fn apply(&mut self, option: EngineOption) {
        match option {
            EngineOption::AutoFlush(kb) => self.autoflush_kb = kb,
            EngineOption::PageSize(bytes) => self.page_size = bytes,
            EngineOption::Safety(safety) => self.safety = safety,
            EngineOption::BlockSize(kb) => self.block_size_kb = kb,
            EngineOption::AutoWork(on) => self.autowork = on,
            EngineOption::Mmap(limit) => self.mmap = limit,
            EngineOption::UseLog(on) => self.use_log = on,
            EngineOption::AutoMerge(n) => self.automerge = n,
            EngineOption::MaxFreelist(n) => self.max_freelist = n,
            EngineOption::MultipleProcesses(on) => self.multiple_processes = on,
            EngineOption::AutoCheckpoint(kb) => self.autocheckpoint_kb = kb,
            EngineOption::ReadOnly(on) => self.readonly = on,
        }
    }

    fn sync_tables(&self) -> bool {
        self.safety != Safety::Off
    }

    fn wal_config(&self, dir: &Path) -> WalConfig {
        WalConfig {
            sync_mode: SyncMode::from(self.safety),
            max_segment_size: u64::from(self.block_size_kb.max(1)) * 1024,
            wal_dir: dir.join(WAL_DIR),
        }
    }
}

/// Everything that exists only while the store is open.
struct Store {
    dir: PathBuf,
    manifest: Manifest,
    /// Oldest first, in manifest order
    tables: Vec<TableReader>,
    wal: WalManager,
}

/// LSM engine bound to one directory.
pub struct LsmEngine {
    settings: EngineSettings,
    compressor: Option<Arc<dyn Compressor>>,
    logger: Option<LogCallback>,
    store: Option<Store>,
    memtable: Memtable,
    savepoints: Savepoints,
    cursors: CursorTable,
    /// Blocks read by tables merged away
    retired_reads: u64,
    blocks_written: u64,
    checkpoint_bytes: u64,
    flushed_bytes: u64,
}

impl Default for LsmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LsmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmEngine")
            .field("path", &self.store.as_ref().map(|s| s.dir.clone()))
            .field("settings", &self.settings)
            .field("compressor", &self.compressor.as_ref().map(|c| c.name()))
            .field("memtable_entries", &self.memtable.len())
            .field("transaction_level", &self.savepoints.level())
            .finish()
    }
}

fn not_open() -> EngineError {
    EngineError::misuse("store is not open")
}

fn emit(logger: &Option<LogCallback>, message: &str, status: Option<Status>) {
    match status {
        Some(status) => warn!(?status, "{}", message),
        None => debug!("{}", message),
    }
    if let Some(callback) = logger {
        callback(message, status);
    }
}

fn cant_open(path: &Path, detail: impl std::fmt::Display) -> EngineError {
    EngineError::new(
        Status::CantOpen,
        format!("cannot open {}: {}", path.display(), detail),
    )
}

fn replay(memtable: &mut Memtable, tables: &mut [TableReader], record: WalRecord) -> EngineResult<()> {
    match record {
        WalRecord::Put { key, value } => {
            memtable.put(key, value);
        }
        WalRecord::Delete { key } => {
            memtable.delete(key);
        }
        WalRecord::DeleteRange { start, end } => {
            let keys = MergedView {
                memtable: &*memtable,
                tables: &mut *tables,
            }
            .live_keys_in(&start, &end)?;
            for key in keys {
                memtable.delete(key);
            }
        }
        _ => {}
    }
    Ok(())
}

impl LsmEngine {
    pub fn new() -> Self {
        Self {
            settings: EngineSettings::default(),
            compressor: None,
            logger: None,
            store: None,
            memtable: Memtable::new(),
            savepoints: Savepoints::new(),
            cursors: CursorTable::new(),
            retired_reads: 0,
            blocks_written: 0,
            checkpoint_bytes: 0,
            flushed_bytes: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Number of live table files.
    pub fn table_count(&self) -> usize {
        self.store.as_ref().map(|s| s.tables.len()).unwrap_or(0)
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        if self.store.is_none() {
            return Err(not_open());
        }
        if self.settings.readonly {
            return Err(EngineError::new(Status::ReadOnly, "store was opened read-only"));
        }
        Ok(())
    }

    fn ensure_closed(&self, what: &str) -> EngineResult<()> {
        if self.store.is_some() {
            return Err(EngineError::misuse(format!("{} must be set before open", what)));
        }
        Ok(())
    }

    fn open_store(&mut self, dir: &Path) -> EngineResult<Store> {
        if dir.exists() && !dir.is_dir() {
            return Err(cant_open(dir, "not a directory"));
        }
        if !dir.exists() {
            if self.settings.readonly {
                return Err(cant_open(dir, "no such store"));
            }
            fs::create_dir_all(dir).map_err(|e| cant_open(dir, e))?;
        }

        let mut manifest = Manifest::load(dir)?;
        let configured = self
            .compressor
            .as_ref()
            .map(|c| c.id())
            .unwrap_or(lsmdb_core::compress::COMPRESSION_NONE);
        if manifest.exists() && manifest.compressor_id() != configured {
            return Err(EngineError::new(
                Status::Mismatch,
                format!(
                    "store uses compressor {}, opened with {}",
                    manifest.compressor_id(),
                    configured
                ),
            ));
        }

        if !self.settings.readonly {
            if !manifest.exists() {
                manifest.set_compressor_id(configured);
                manifest.persist(self.settings.sync_tables())?;
            }
            for orphan in manifest.orphans()? {
                debug!(path = %orphan.display(), "removing unreferenced table");
                fs::remove_file(&orphan)?;
            }
        }

        let mut tables = Vec::with_capacity(manifest.tables().len());
        for meta in manifest.tables() {
            tables.push(TableReader::open(dir, meta.clone(), self.compressor.clone())?);
        }

        let mut wal = WalManager::new(self.settings.wal_config(dir));
        let (records, stats) = lsmdb_wal::RecoveryManager::new(wal.config().wal_dir.clone())
            .recover_with_stats()?;
        if stats.torn_tails > 0 || stats.stopped_at_corruption {
            emit(
                &self.logger,
                &format!(
                    "log recovery dropped a damaged tail ({} torn, corrupt: {})",
                    stats.torn_tails, stats.stopped_at_corruption
                ),
                Some(Status::Corrupt),
            );
        }
        if stats.transactions_incomplete > 0 {
            debug!(
                incomplete = stats.transactions_incomplete,
                "discarded uncommitted log groups"
            );
        }
        let replayed = records.len();
        for record in records {
            replay(&mut self.memtable, &mut tables, record)?;
        }

        if !self.settings.readonly && self.settings.use_log {
            wal.open()?;
        }

        info!(
            path = %dir.display(),
            tables = tables.len(),
            replayed,
            readonly = self.settings.readonly,
            "store opened"
        );
        Ok(Store {
            dir: dir.to_path_buf(),
            manifest,
            tables,
            wal,
        })
    }

    /// Append `record` now, or hold it back while a transaction is open.
    fn log_write(&mut self, record: WalRecord) -> EngineResult<()> {
        if self.savepoints.is_open() {
            self.savepoints.defer_log(record);
            return Ok(());
        }
        let store = self.store.as_mut().ok_or_else(not_open)?;
        if store.wal.is_open() {
            store.wal.append(&record)?;
        }
        Ok(())
    }

    fn write_entry(&mut self, key: &[u8], entry: MemtableEntry) -> EngineResult<()> {
        self.ensure_writable()?;
        let record = match &entry {
            MemtableEntry::Value(value) => WalRecord::put(key.to_vec(), value.clone()),
            MemtableEntry::Tombstone => WalRecord::delete(key.to_vec()),
        };
        self.log_write(record)?;
        let previous = self.memtable.apply(key.to_vec(), entry);
        self.savepoints.record_undo(key.to_vec(), previous);
        self.maybe_autoflush()
    }

    fn maybe_autoflush(&mut self) -> EngineResult<()> {
        if self.savepoints.is_open() || self.settings.autoflush_kb == 0 {
            return Ok(());
        }
        if self.memtable.size_bytes() >= u64::from(self.settings.autoflush_kb) * 1024 {
            self.flush_and_maintain()?;
        }
        Ok(())
    }

    /// Flush, then the automatic merge and checkpoint work.
    fn flush_and_maintain(&mut self) -> EngineResult<()> {
        if !self.flush_memtable()? {
            return Ok(());
        }
        if self.settings.autowork {
            self.merge_pass(self.settings.automerge)?;
        }
        let threshold = u64::from(self.settings.autocheckpoint_kb) * 1024;
        if threshold > 0 && self.checkpoint_bytes >= threshold {
            self.checkpoint_store()?;
        }
        Ok(())
    }

    /// Write the memtable into a new table. Returns false when there was
    /// nothing to write.
    fn flush_memtable(&mut self) -> EngineResult<bool> {
        if self.memtable.is_empty() {
            return Ok(false);
        }
        let sync = self.settings.sync_tables();
        let block_size = self.settings.page_size as usize;
        let store = self.store.as_mut().ok_or_else(not_open)?;

        let id = store.manifest.allocate_table_id();
        let mut writer = TableWriter::create(&store.dir, id, block_size, self.compressor.clone())?;
        for (key, entry) in self.memtable.iter() {
            if let Err(err) = writer.add(&BlockEntry::from_memtable(key.clone(), entry.clone())) {
                writer.abandon();
                return Err(err);
            }
        }
        let meta = writer.finish(sync)?;
        let reader = TableReader::open(&store.dir, meta.clone(), self.compressor.clone())?;
        store.manifest.add_table(meta.clone());
        store.manifest.persist(sync)?;
        store.tables.push(reader);
        store.wal.truncate()?;

        self.flushed_bytes += self.memtable.size_bytes();
        self.memtable.take();
        self.blocks_written += meta.blocks;
        self.checkpoint_bytes += meta.file_size;
        emit(
            &self.logger,
            &format!(
                "flushed {} entries into table {} ({} bytes)",
                meta.entry_count, meta.id, meta.file_size
            ),
            None,
        );
        Ok(true)
    }

    /// Merge the newest `nmerge` tables (all of them for 0 or 1). Returns
    /// the KB written.
    fn merge_pass(&mut self, nmerge: u32) -> EngineResult<u32> {
        let sync = self.settings.sync_tables();
        let block_size = self.settings.page_size as usize;
        let store = self.store.as_mut().ok_or_else(not_open)?;

        let count = store.tables.len();
        if count < 2 {
            return Ok(0);
        }
        let run = if nmerge <= 1 {
            count
        } else if nmerge as usize > count {
            return Ok(0);
        } else {
            nmerge as usize
        };
        let start = count - run;

        let target = MergeTarget {
            dir: &store.dir,
            table_id: store.manifest.allocate_table_id(),
            block_size,
            compressor: self.compressor.clone(),
            drop_tombstones: start == 0,
            sync,
        };
        let (output, stats) = merge_tables(&mut store.tables[start..], target)?;

        let inputs: Vec<TableReader> = store.tables.drain(start..).collect();
        let input_ids: Vec<u64> = inputs.iter().map(|t| t.meta().id).collect();
        store.manifest.replace_tables(&input_ids, output.clone())?;
        store.manifest.persist(sync)?;
        if let Some(meta) = output {
            store
                .tables
                .push(TableReader::open(&store.dir, meta, self.compressor.clone())?);
        }
        for reader in inputs {
            self.retired_reads += reader.blocks_read();
            if let Err(err) = sstable::delete_table(&store.dir, reader.meta()) {
                warn!(table = reader.meta().id, error = %err, "failed to remove merged table");
            }
        }

        self.blocks_written += stats.blocks_written;
        self.checkpoint_bytes += stats.bytes_written;
        emit(
            &self.logger,
            &format!(
                "merged {} tables: {} entries kept, {} removed",
                stats.inputs, stats.entries_written, stats.entries_removed
            ),
            None,
        );
        Ok(((stats.bytes_written + 1023) / 1024) as u32)
    }

    fn checkpoint_store(&mut self) -> EngineResult<u64> {
        let store = self.store.as_mut().ok_or_else(not_open)?;
        store.wal.sync()?;
        let bytes = std::mem::take(&mut self.checkpoint_bytes);
        self.flushed_bytes = 0;
        emit(&self.logger, &format!("checkpoint after {} bytes", bytes), None);
        Ok(bytes)
    }

    /// Split borrow of the memtable and tables for cursor work.
    fn view(&mut self) -> EngineResult<MergedView<'_>> {
        let store = self.store.as_mut().ok_or_else(not_open)?;
        Ok(MergedView {
            memtable: &self.memtable,
            tables: &mut store.tables,
        })
    }

    fn step(&mut self, csr: CursorId, forward: bool) -> EngineResult<()> {
        let state = self.cursors.get(csr)?;
        if state.exact {
            return Err(EngineError::misuse(
                "cursor positioned by an exact seek cannot step",
            ));
        }
        let key = state
            .key()
            .map(|k| k.to_vec())
            .ok_or_else(|| EngineError::misuse("cursor is not positioned"))?;
        let mut view = self.view()?;
        let next = if forward {
            view.next_live(Some(&key), false)?
        } else {
            view.prev_live(Some(&key), false)?
        };
        self.cursors.get_mut(csr)?.current = next;
        Ok(())
    }

    fn position(&mut self, csr: CursorId, forward: bool) -> EngineResult<()> {
        self.cursors.get(csr)?;
        let mut view = self.view()?;
        let current = if forward {
            view.next_live(None, true)?
        } else {
            view.prev_live(None, true)?
        };
        *self.cursors.get_mut(csr)? = CursorState {
            current,
            exact: false,
        };
        Ok(())
    }

    fn current(&self, csr: CursorId) -> EngineResult<&(Vec<u8>, Vec<u8>)> {
        self.cursors
            .get(csr)?
            .current
            .as_ref()
            .ok_or_else(|| EngineError::misuse("cursor is not positioned"))
    }
}

impl Engine for LsmEngine {
    fn configure(&mut self, option: EngineOption) -> EngineResult<()> {
        self.ensure_closed("options")?;
        self.settings.apply(option);
        Ok(())
    }

    fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) -> EngineResult<()> {
        self.ensure_closed("the compressor")?;
        debug!(codec = compressor.name(), level = compressor.level(), "compressor installed");
        self.compressor = Some(compressor);
        Ok(())
    }

    fn set_logger(&mut self, logger: LogCallback) {
        self.logger = Some(logger);
    }

    fn open(&mut self, path: &Path) -> EngineResult<()> {
        if self.store.is_some() {
            return Err(EngineError::misuse("store is already open"));
        }
        self.memtable = Memtable::new();
        match self.open_store(path) {
            Ok(store) => {
                self.store = Some(store);
                Ok(())
            }
            Err(err) => {
                self.memtable = Memtable::new();
                emit(&self.logger, &err.message, Some(err.status));
                Err(err)
            }
        }
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.store.is_none() {
            return Ok(());
        }
        let released = self.cursors.clear();
        if released > 0 {
            debug!(released, "cursors released at close");
        }
        self.savepoints.rollback(0, &mut self.memtable);

        let flushed = if self.settings.readonly {
            Ok(false)
        } else {
            self.flush_memtable()
        };
        let closed = match self.store.take() {
            Some(mut store) => store.wal.close(),
            None => Ok(()),
        };
        self.memtable = Memtable::new();
        info!("store closed");
        flushed.and(closed)
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.write_entry(key, MemtableEntry::Value(value.to_vec()))
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.write_entry(key, MemtableEntry::Tombstone)
    }

    fn delete_range(&mut self, start: &[u8], end: &[u8]) -> EngineResult<()> {
        self.ensure_writable()?;
        if start >= end {
            return Ok(());
        }
        let keys = self.view()?.live_keys_in(start, end)?;
        self.log_write(WalRecord::delete_range(start.to_vec(), end.to_vec()))?;
        for key in keys {
            let previous = self.memtable.delete(key.clone());
            self.savepoints.record_undo(key, previous);
        }
        self.maybe_autoflush()
    }

    fn begin(&mut self, level: u32) -> EngineResult<()> {
        self.ensure_writable()?;
        self.savepoints.begin(level);
        Ok(())
    }

    fn commit(&mut self, level: u32) -> EngineResult<()> {
        if self.store.is_none() {
            return Err(not_open());
        }
        if let Some(records) = self.savepoints.commit(level) {
            if !records.is_empty() {
                let store = self.store.as_mut().ok_or_else(not_open)?;
                if store.wal.is_open() {
                    let group = store.wal.append_group(&records)?;
                    debug!(group, records = records.len(), "transaction committed");
                }
            }
            self.maybe_autoflush()?;
        }
        Ok(())
    }

    fn rollback(&mut self, level: u32) -> EngineResult<()> {
        if self.store.is_none() {
            return Err(not_open());
        }
        let undone = self.savepoints.rollback(level, &mut self.memtable);
        debug!(level, undone, "rolled back");
        Ok(())
    }

    fn transaction_level(&self) -> u32 {
        self.savepoints.level()
    }

    fn csr_open(&mut self) -> EngineResult<CursorId> {
        if self.store.is_none() {
            return Err(not_open());
        }
        Ok(self.cursors.open())
    }

    fn csr_close(&mut self, csr: CursorId) -> EngineResult<()> {
        self.cursors.close(csr)
    }

    fn csr_seek(&mut self, csr: CursorId, key: &[u8], mode: SeekMode) -> EngineResult<()> {
        self.cursors.get(csr)?;
        let state = cursor::seek(&mut self.view()?, key, mode)?;
        *self.cursors.get_mut(csr)? = state;
        Ok(())
    }

    fn csr_first(&mut self, csr: CursorId) -> EngineResult<()> {
        self.position(csr, true)
    }

    fn csr_last(&mut self, csr: CursorId) -> EngineResult<()> {
        self.position(csr, false)
    }

    fn csr_next(&mut self, csr: CursorId) -> EngineResult<()> {
        self.step(csr, true)
    }

    fn csr_prev(&mut self, csr: CursorId) -> EngineResult<()> {
        self.step(csr, false)
    }

    fn csr_valid(&self, csr: CursorId) -> bool {
        self.cursors
            .get(csr)
            .map(|state| state.is_valid())
            .unwrap_or(false)
    }

    fn csr_key(&self, csr: CursorId) -> EngineResult<Vec<u8>> {
        self.current(csr).map(|(key, _)| key.clone())
    }

    fn csr_value(&self, csr: CursorId) -> EngineResult<Vec<u8>> {
        self.current(csr).map(|(_, value)| value.clone())
    }

    fn csr_cmp(&self, csr: CursorId, key: &[u8]) -> EngineResult<Ordering> {
        self.current(csr).map(|(current, _)| current.as_slice().cmp(key))
    }

    fn work(&mut self, nmerge: u32, _nkb: u32) -> EngineResult<u32> {
        self.ensure_writable()?;
        self.merge_pass(nmerge)
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.ensure_writable()?;
        if self.savepoints.is_open() {
            return Err(EngineError::misuse("cannot flush inside a write transaction"));
        }
        self.flush_and_maintain()
    }

    fn checkpoint(&mut self) -> EngineResult<u64> {
        self.ensure_writable()?;
        self.checkpoint_store()
    }

    fn info(&self, kind: InfoKind) -> EngineResult<u64> {
        let store = self.store.as_ref().ok_or_else(not_open)?;
        let value = match kind {
            InfoKind::NRead => {
                self.retired_reads + store.tables.iter().map(|t| t.blocks_read()).sum::<u64>()
            }
            InfoKind::NWrite => self.blocks_written,
            InfoKind::CheckpointSize => self.checkpoint_bytes / 1024,
            InfoKind::TreeSizeOld => self.flushed_bytes / 1024,
            InfoKind::TreeSizeCurrent => self.memtable.size_bytes() / 1024,
        };
        Ok(value)
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if self.store.is_some() {
            if let Err(err) = self.close() {
                warn!(error = %err, "failed to close store on drop");
            }
        }
    }
}
