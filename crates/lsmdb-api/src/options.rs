//! Handle configuration.
//!
//! Every value is fixed once the handle exists; [`DatabaseOptions::validate`]
//! runs before any engine is created, so a bad value never leaves a half
//! built handle behind.

use lsmdb_compress::Compression;
use lsmdb_core::{Compressor, EngineOption, Error, Result, Safety};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest accepted `autoflush`, in KB (1 GiB).
pub const MAX_AUTOFLUSH_KB: u32 = 1_048_576;
/// Smallest accepted `block_size`, in KB.
pub const MIN_BLOCK_SIZE_KB: u32 = 64;
/// `block_size` must stay below this, in KB.
pub const BLOCK_SIZE_LIMIT_KB: u32 = 65_536;

/// Tuning parameters of a [`Database`](crate::Database).
///
/// ```rust
/// use lsmdb::{Compression, DatabaseOptions, Safety};
///
/// let options = DatabaseOptions::default()
///     .safety(Safety::Full)
///     .compression(Compression::Zstd)
///     .compress_level(9)
///     .text_mode(true);
/// assert!(options.validate().unwrap().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// KB written to table files between automatic checkpoints
    pub autocheckpoint: u32,
    /// In-memory tree size (KB) that triggers a flush; 0 disables it
    pub autoflush: u32,
    /// Tables merged per automatic work pass
    pub automerge: u32,
    /// Run merge work after flushes
    pub autowork: bool,
    /// Memory-map limit; recorded, not used by the bundled engine
    pub mmap: u32,
    /// Block size in KB; a power of two in `[64, 65536)`
    pub block_size: u32,
    /// Free-list bound; recorded, not used by the bundled engine
    pub max_freelist: u32,
    /// Multi-process locking; recorded, not used by the bundled engine
    pub multiple_processes: bool,
    /// Page size in bytes
    pub page_size: u32,
    /// Refuse every write
    pub readonly: bool,
    /// Durability level
    pub safety: Safety,
    /// Write-ahead log on or off
    pub use_log: bool,
    /// Keys and values are `String`s instead of bytes
    pub text_mode: bool,
    /// Block compression
    pub compression: Compression,
    /// Codec level; defaults per algorithm
    pub compress_level: Option<i32>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            autocheckpoint: 2048,
            autoflush: 1024,
            automerge: 4,
            autowork: true,
            mmap: 0,
            block_size: 1024,
            max_freelist: 24,
            multiple_processes: true,
            page_size: 4096,
            readonly: false,
            safety: Safety::Normal,
            use_log: true,
            text_mode: false,
            compression: Compression::None,
            compress_level: None,
        }
    }
}

impl DatabaseOptions {
    /// Defaults with text keys and values.
    pub fn text() -> Self {
        Self::default().text_mode(true)
    }

    /// Set `autocheckpoint` (KB).
    pub fn autocheckpoint(mut self, kb: u32) -> Self {
        self.autocheckpoint = kb;
        self
    }

    /// Set `autoflush` (KB).
    pub fn autoflush(mut self, kb: u32) -> Self {
        self.autoflush = kb;
        self
    }

    /// Set `automerge`.
    pub fn automerge(mut self, segments: u32) -> Self {
        self.automerge = segments;
        self
    }

    /// Set `autowork`.
    pub fn autowork(mut self, on: bool) -> Self {
        self.autowork = on;
        self
    }

    /// Set `mmap`.
    pub fn mmap(mut self, limit: u32) -> Self {
        self.mmap = limit;
        self
    }

    /// Set `block_size` (KB).
    pub fn block_size(mut self, kb: u32) -> Self {
        self.block_size = kb;
        self
    }

    /// Set `max_freelist`.
    pub fn max_freelist(mut self, entries: u32) -> Self {
        self.max_freelist = entries;
        self
    }

    /// Set `multiple_processes`.
    pub fn multiple_processes(mut self, on: bool) -> Self {
        self.multiple_processes = on;
        self
    }

    /// Set `page_size` (bytes).
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = bytes;
        self
    }

    /// Set `readonly`.
    pub fn readonly(mut self, on: bool) -> Self {
        self.readonly = on;
        self
    }

    /// Set `safety`.
    pub fn safety(mut self, safety: Safety) -> Self {
        self.safety = safety;
        self
    }

    /// Set `use_log`.
    pub fn use_log(mut self, on: bool) -> Self {
        self.use_log = on;
        self
    }

    /// Set `text_mode`.
    pub fn text_mode(mut self, on: bool) -> Self {
        self.text_mode = on;
        self
    }

    /// Set the compression algorithm.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the codec level.
    pub fn compress_level(mut self, level: i32) -> Self {
        self.compress_level = Some(level);
        self
    }

    /// Check every value and build the compressor to install (`None` for
    /// uncompressed stores).
    pub fn validate(&self) -> Result<Option<Arc<dyn Compressor>>> {
        if self.autoflush > MAX_AUTOFLUSH_KB {
            return Err(Error::config(format!(
                "autoflush must be in 0..={} KB, got {}",
                MAX_AUTOFLUSH_KB, self.autoflush
            )));
        }
        if self.autocheckpoint == 0 {
            return Err(Error::config("autocheckpoint must be positive"));
        }
        if !self.block_size.is_power_of_two()
            || self.block_size < MIN_BLOCK_SIZE_KB
            || self.block_size >= BLOCK_SIZE_LIMIT_KB
        {
            return Err(Error::config(format!(
                "block_size must be a power of two in [{}, {}), got {}",
                MIN_BLOCK_SIZE_KB, BLOCK_SIZE_LIMIT_KB, self.block_size
            )));
        }
        // Safety is a closed enum; out-of-range codes are rejected by `Safety::from_code`.
        lsmdb_compress::select(self.compression, self.compress_level)
    }

    /// The options pushed into the engine before it is opened.
    pub(crate) fn engine_options(&self) -> Vec<EngineOption> {
        vec![
            EngineOption::AutoFlush(self.autoflush),
            EngineOption::PageSize(self.page_size),
            EngineOption::Safety(self.safety),
            EngineOption::BlockSize(self.block_size),
            EngineOption::AutoWork(self.autowork),
            EngineOption::Mmap(self.mmap),
            EngineOption::UseLog(self.use_log),
            EngineOption::AutoMerge(self.automerge),
            EngineOption::MaxFreelist(self.max_freelist),
            EngineOption::MultipleProcesses(self.multiple_processes),
            EngineOption::AutoCheckpoint(self.autocheckpoint),
            EngineOption::ReadOnly(self.readonly),
        ]
    }
}

/// Parse a numeric safety level (0, 1, 2) the way configuration files carry it.
pub fn safety_from_code(code: i32) -> Result<Safety> {
    Safety::from_code(code).ok_or_else(|| {
        Error::config(format!("safety must be 0 (off), 1 (normal) or 2 (full), got {}", code))
    })
}
