//! Block compressor interface consumed by the engine.

use crate::engine::EngineError;
use std::fmt;

/// Identifier stored in table files written without compression.
pub const COMPRESSION_NONE: u32 = 1;
/// Identifier of the lz4 block compressor.
pub const COMPRESSION_LZ4: u32 = 1024;
/// Identifier of the zstd block compressor.
pub const COMPRESSION_ZSTD: u32 = 2048;

/// A codec failure. Always fatal to the operation that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionError {
    /// Codec name
    pub codec: &'static str,
    /// What went wrong
    pub message: String,
}

impl CompressionError {
    /// Build an error for `codec`.
    pub fn new(codec: &'static str, message: impl Into<String>) -> Self {
        Self {
            codec,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} codec failed: {}", self.codec, self.message)
    }
}

impl std::error::Error for CompressionError {}

impl From<CompressionError> for EngineError {
    fn from(err: CompressionError) -> Self {
        EngineError::corrupt(err.to_string())
    }
}

/// The `bound / compress / uncompress` triple the engine calls for every data block.
///
/// Implementations must be deterministic for a given level, must never produce
/// more than `bound(input.len())` bytes, and must report codec failures as
/// errors instead of returning truncated output.
pub trait Compressor: Send + Sync {
    /// Identifier persisted next to compressed data.
    fn id(&self) -> u32;

    /// Short codec name ("lz4", "zstd").
    fn name(&self) -> &'static str;

    /// Configured compression level.
    fn level(&self) -> i32;

    /// Upper bound of the compressed size of an input of `input_len` bytes.
    fn bound(&self, input_len: usize) -> usize;

    /// Compress `input`.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Decompress `input` into at most `capacity` bytes.
    fn uncompress(&self, input: &[u8], capacity: usize) -> Result<Vec<u8>, CompressionError>;
}

impl fmt::Debug for dyn Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("level", &self.level())
            .finish()
    }
}
