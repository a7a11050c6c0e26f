//! # lsmdb Compress
//!
//! lz4 and zstd implementations of the engine's block [`Compressor`] trait,
//! plus the selection and level validation done once when a database handle
//! is constructed.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! Users should depend on the main [`lsmdb`](https://crates.io/crates/lsmdb)
//! crate, which re-exports [`Compression`].

use lsmdb_core::{Compressor, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

mod lz4_codec;
mod zstd_codec;

pub use lz4_codec::{Lz4Compressor, LZ4_DEFAULT_LEVEL, LZ4_MAX_LEVEL, LZ4_MIN_LEVEL};
pub use zstd_codec::{zstd_max_level, ZstdCompressor, ZSTD_DEFAULT_LEVEL, ZSTD_MIN_LEVEL};

/// Block compression algorithm of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Compression {
    /// Blocks are stored raw
    #[default]
    None,
    /// lz4 block format
    Lz4,
    /// zstd frames
    Zstd,
}

impl Compression {
    /// Level used when none is configured. `None` has no level.
    pub fn default_level(self) -> Option<i32> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some(LZ4_DEFAULT_LEVEL),
            Compression::Zstd => Some(ZSTD_DEFAULT_LEVEL),
        }
    }

    /// Accepted levels, inclusive. `None` has no levels.
    pub fn level_range(self) -> Option<(i32, i32)> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some((LZ4_MIN_LEVEL, LZ4_MAX_LEVEL)),
            Compression::Zstd => Some((ZSTD_MIN_LEVEL, zstd_max_level())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        })
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::config(format!(
                "compression must be one of none, lz4, zstd; got {:?}",
                other
            ))),
        }
    }
}

/// Validate `level` against `compression` and build the compressor to
/// install. `Compression::None` installs nothing and ignores `level`.
pub fn select(compression: Compression, level: Option<i32>) -> Result<Option<Arc<dyn Compressor>>> {
    let (min, max) = match compression.level_range() {
        Some(range) => range,
        None => return Ok(None),
    };

    let level = match level {
        Some(level) => level,
        None => compression.default_level().unwrap_or(min),
    };
    if !(min..=max).contains(&level) {
        return Err(Error::config(format!(
            "{} compress_level must be in {}..={}, got {}",
            compression, min, max, level
        )));
    }

    let compressor: Arc<dyn Compressor> = match compression {
        Compression::Lz4 => Arc::new(Lz4Compressor::new(level)),
        Compression::Zstd => Arc::new(ZstdCompressor::new(level)),
        Compression::None => return Ok(None),
    };
    debug!(codec = compressor.name(), level, "block compressor selected");
    Ok(Some(compressor))
}
