// lz4 block compressor
//
// Levels run 1..=16. The level picks the fast-mode acceleration:
// acceleration = (1 << (16 - level)) + 1, so 16 is the slowest and tightest.

use lsmdb_core::compress::COMPRESSION_LZ4;
use lsmdb_core::{CompressionError, Compressor};
use lz4::block::{self, CompressionMode};

pub const LZ4_MIN_LEVEL: i32 = 1;
pub const LZ4_MAX_LEVEL: i32 = 16;
pub const LZ4_DEFAULT_LEVEL: i32 = 16;

const NAME: &str = "lz4";

#[derive(Debug, Clone)]
pub struct Lz4Compressor {
    level: i32,
    acceleration: i32,
}

impl Lz4Compressor {
    /// `level` must already be inside `LZ4_MIN_LEVEL..=LZ4_MAX_LEVEL`.
    pub fn new(level: i32) -> Self {
        let level = level.clamp(LZ4_MIN_LEVEL, LZ4_MAX_LEVEL);
        Self {
            level,
            acceleration: (1 << (16 - level)) + 1,
        }
    }

    pub fn acceleration(&self) -> i32 {
        self.acceleration
    }
}

impl Compressor for Lz4Compressor {
    fn id(&self) -> u32 {
        COMPRESSION_LZ4
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn bound(&self, input_len: usize) -> usize {
        // LZ4_COMPRESSBOUND when the library refuses the size
        block::compress_bound(input_len).unwrap_or(input_len + input_len / 255 + 16)
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let out = block::compress(input, Some(CompressionMode::FAST(self.acceleration)), false)
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
        let capacity = i32::try_from(capacity)
            .map_err(|_| CompressionError::new(NAME, format!("capacity {} too large", capacity)))?;
        block::decompress(input, Some(capacity))
            .map_err(|e| CompressionError::new(NAME, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..8192u32).flat_map(|i| (i % 97).to_le_bytes()).collect()
    }

    #[test]
    fn test_acceleration_by_level() {
        assert_eq!(Lz4Compressor::new(16).acceleration(), 2);
        assert_eq!(Lz4Compressor::new(15).acceleration(), 3);
        assert_eq!(Lz4Compressor::new(1).acceleration(), 32769);
    }

    #[test]
    fn test_round_trip_every_level() {
        let data = sample();
        for level in LZ4_MIN_LEVEL..=LZ4_MAX_LEVEL {
            let codec = Lz4Compressor::new(level);
            let packed = codec.compress(&data).unwrap();
            assert!(packed.len() <= codec.bound(data.len()), "level {}", level);
            assert_eq!(codec.uncompress(&packed, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_capacity_too_small_fails() {
        let codec = Lz4Compressor::new(LZ4_DEFAULT_LEVEL);
        let data = sample();
        let packed = codec.compress(&data).unwrap();

        let err = codec.uncompress(&packed, data.len() / 2).unwrap_err();
        assert_eq!(err.codec, "lz4");
    }

    #[test]
    fn test_garbage_input_fails() {
        let codec = Lz4Compressor::new(LZ4_DEFAULT_LEVEL);
        assert!(codec.uncompress(&[0xFF; 32], 1024).is_err());
    }
}
