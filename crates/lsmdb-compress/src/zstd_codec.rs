// zstd block compressor built on the bulk (single-shot) API

use lsmdb_core::compress::COMPRESSION_ZSTD;
use lsmdb_core::{CompressionError, Compressor};

pub const ZSTD_MIN_LEVEL: i32 = 1;
pub const ZSTD_DEFAULT_LEVEL: i32 = 3;

const NAME: &str = "zstd";

/// Highest level the linked zstd library accepts.
pub fn zstd_max_level() -> i32 {
    *zstd::compression_level_range().end()
}

#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// `level` must already be inside `ZSTD_MIN_LEVEL..=zstd_max_level()`.
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(ZSTD_MIN_LEVEL, zstd_max_level()),
        }
    }
}

impl Compressor for ZstdCompressor {
    fn id(&self) -> u32 {
        COMPRESSION_ZSTD
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn bound(&self, input_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(input_len)
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let out = zstd::bulk::compress(input, self.level)
            .map_err(|e| CompressionError::new(NAME, e.to_string()))?;
        if out.len() > self.bound(input.len()) {
            return Err(CompressionError::new(
                NAME,
                format!("{} bytes exceed the bound for {}", out.len(), input.len()),
            ));
        }
        Ok(out)
    }

    fn uncompress(&self, input: &[u8], capacity: usize) -> Result<Vec<u8>, CompressionError> {
        zstd::bulk::decompress(input, capacity)
            .map_err(|e| CompressionError::new(NAME, e.to_string()))
    }
}
