//! The engine boundary.
//!
//! [`Engine`] is the narrow handle API the binding layer drives. It mirrors
//! the classic lsm1 C interface: integer savepoint levels, cursors addressed
//! by handle, status codes instead of rich errors. Everything behind it
//! (memtable, log, table files, merging) is the engine's business.

use crate::compress::Compressor;
use crate::types::{Safety, SeekMode};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Status codes an engine call can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Generic failure
    Error,
    /// Another connection holds a conflicting lock
    Busy,
    /// Allocation failure
    NoMem,
    /// Write attempted on a read-only connection or file
    ReadOnly,
    /// I/O failure
    IoErr,
    /// On-disk data failed validation
    Corrupt,
    /// Disk or address space full
    Full,
    /// The store could not be opened
    CantOpen,
    /// Locking protocol violation
    Protocol,
    /// API used incorrectly
    Misuse,
    /// Store was written with a different configuration (e.g. compressor)
    Mismatch,
    /// File does not exist
    IoErrNoEnt,
}

impl Status {
    /// The lsm1 numeric value of this status.
    pub fn code(self) -> i32 {
        match self {
            Status::Error => 1,
            Status::Busy => 5,
            Status::NoMem => 7,
            Status::ReadOnly => 8,
            Status::IoErr => 10,
            Status::Corrupt => 11,
            Status::Full => 13,
            Status::CantOpen => 14,
            Status::Protocol => 15,
            Status::Misuse => 21,
            Status::Mismatch => 50,
            Status::IoErrNoEnt => 10 | (1 << 8),
        }
    }
}

/// Failure reported by an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Status code
    pub status: Status,
    /// Human readable detail
    pub message: String,
}

impl EngineError {
    /// Build an error from a status and message.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `Status::Corrupt` with a message.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(Status::Corrupt, message)
    }

    /// `Status::Misuse` with a message.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(Status::Misuse, message)
    }

    /// `Status::IoErr` with a message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Status::IoErr, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.status, self.status.code(), self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        let status = match err.kind() {
            std::io::ErrorKind::NotFound => Status::IoErrNoEnt,
            std::io::ErrorKind::PermissionDenied => Status::ReadOnly,
            std::io::ErrorKind::OutOfMemory => Status::NoMem,
            _ => Status::IoErr,
        };
        Self::new(status, err.to_string())
    }
}

/// Result of an engine call.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Callback receiving engine log messages. Failures carry the status they
/// relate to; progress messages carry `None`.
pub type LogCallback = Arc<dyn Fn(&str, Option<Status>) + Send + Sync>;

/// Opaque handle of an engine cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorId(pub u64);

/// A named configuration value pushed into the engine before `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOption {
    /// In-memory tree size (KB) that triggers a flush
    AutoFlush(u32),
    /// Page size in bytes
    PageSize(u32),
    /// Durability level
    Safety(Safety),
    /// Block size in KB
    BlockSize(u32),
    /// Run merge work automatically after flushes
    AutoWork(bool),
    /// Memory-map limit (recorded only)
    Mmap(u32),
    /// Write-ahead log on/off
    UseLog(bool),
    /// Segments merged per automatic work pass
    AutoMerge(u32),
    /// Free-list bound (recorded only)
    MaxFreelist(u32),
    /// Multi-process locking (recorded only)
    MultipleProcesses(bool),
    /// KB written between automatic checkpoints
    AutoCheckpoint(u32),
    /// Open without write access
    ReadOnly(bool),
}

/// Statistics that can be requested through [`Engine::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    /// Pages read from table files
    NRead,
    /// Pages written to table files
    NWrite,
    /// KB written to table files since the last checkpoint
    CheckpointSize,
    /// KB held by data flushed since the last checkpoint
    TreeSizeOld,
    /// KB held by the live in-memory tree
    TreeSizeCurrent,
}

/// The handle API of an ordered key-value engine.
///
/// Implementations are driven from one thread at a time; the caller
/// serializes access (the binding keeps every engine behind a mutex).
pub trait Engine: Send {
    /// Push a configuration value. Only valid before `open`.
    fn configure(&mut self, option: EngineOption) -> EngineResult<()>;

    /// Install a block compressor. Only valid before `open`.
    fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) -> EngineResult<()>;

    /// Install a log callback.
    fn set_logger(&mut self, logger: LogCallback);

    /// Open the store at `path`.
    fn open(&mut self, path: &Path) -> EngineResult<()>;

    /// Close the store, releasing every outstanding cursor.
    fn close(&mut self) -> EngineResult<()>;

    /// Insert or overwrite one entry.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Delete one entry. Deleting a missing key is not an error.
    fn delete(&mut self, key: &[u8]) -> EngineResult<()>;

    /// Delete every key in `[start, end)`.
    fn delete_range(&mut self, start: &[u8], end: &[u8]) -> EngineResult<()>;

    /// Open savepoint levels up to `level`.
    fn begin(&mut self, level: u32) -> EngineResult<()>;

    /// Close every level above `level`; `0` makes the work durable.
    fn commit(&mut self, level: u32) -> EngineResult<()>;

    /// Discard work back to the start of `level`, leaving `level` levels open.
    fn rollback(&mut self, level: u32) -> EngineResult<()>;

    /// Current number of open savepoint levels.
    fn transaction_level(&self) -> u32;

    /// Open a cursor. It starts out invalid.
    fn csr_open(&mut self) -> EngineResult<CursorId>;

    /// Release a cursor.
    fn csr_close(&mut self, csr: CursorId) -> EngineResult<()>;

    /// Position `csr` relative to `key`.
    fn csr_seek(&mut self, csr: CursorId, key: &[u8], mode: SeekMode) -> EngineResult<()>;

    /// Position on the smallest key.
    fn csr_first(&mut self, csr: CursorId) -> EngineResult<()>;

    /// Position on the largest key.
    fn csr_last(&mut self, csr: CursorId) -> EngineResult<()>;

    /// Step to the next larger key.
    fn csr_next(&mut self, csr: CursorId) -> EngineResult<()>;

    /// Step to the next smaller key.
    fn csr_prev(&mut self, csr: CursorId) -> EngineResult<()>;

    /// Whether `csr` points at an entry.
    fn csr_valid(&self, csr: CursorId) -> bool;

    /// Key under the cursor.
    fn csr_key(&self, csr: CursorId) -> EngineResult<Vec<u8>>;

    /// Value under the cursor.
    fn csr_value(&self, csr: CursorId) -> EngineResult<Vec<u8>>;

    /// Compare the cursor's key with `key`.
    fn csr_cmp(&self, csr: CursorId, key: &[u8]) -> EngineResult<Ordering>;

    /// Merge up to `nmerge` segments, writing at most about `nkb` KB.
    /// Returns the KB written.
    fn work(&mut self, nmerge: u32, nkb: u32) -> EngineResult<u32>;

    /// Flush the in-memory tree to a new segment.
    fn flush(&mut self) -> EngineResult<()>;

    /// Make flushed data durable; returns the bytes written since the previous checkpoint.
    fn checkpoint(&mut self) -> EngineResult<u64>;

    /// Read one statistic.
    fn info(&self, kind: InfoKind) -> EngineResult<u64>;
}
