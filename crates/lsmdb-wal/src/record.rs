// Log record framing
//
// Frame layout:
// [length: u32 LE] [type: u8] [bincode payload] [crc32(type + payload): u32 LE]
//
// `length` counts the type byte plus the payload.

use crc32fast::Hasher;
use lsmdb_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Frame overhead: length prefix, type byte and trailing CRC.
pub const FRAME_OVERHEAD: usize = 4 + 1 + 4;

/// Largest content length accepted when reading a frame back.
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Record type tag written in front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Put = 1,
    Delete = 2,
    DeleteRange = 3,
    BeginTx = 4,
    CommitTx = 5,
    Checkpoint = 6,
}

impl TryFrom<u8> for RecordType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            1 => RecordType::Put,
            2 => RecordType::Delete,
            3 => RecordType::DeleteRange,
            4 => RecordType::BeginTx,
            5 => RecordType::CommitTx,
            6 => RecordType::Checkpoint,
            other => return Err(FrameError::Corrupt(format!("unknown record type {}", other))),
        })
    }
}

/// One logged change or marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    /// Insert or overwrite
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Point delete
    Delete { key: Vec<u8> },
    /// Delete every key in `[start, end)`
    DeleteRange { start: Vec<u8>, end: Vec<u8> },
    /// Start of a committed write group
    BeginTx { tx_id: u64 },
    /// End of a committed write group
    CommitTx { tx_id: u64 },
    /// Everything before this point is in table files
    Checkpoint { sequence: u64 },
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does (torn write at the log tail).
    Incomplete { needed: usize, available: usize },
    /// The frame is complete but its content is invalid.
    Corrupt(String),
}

impl From<FrameError> for EngineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Incomplete { needed, available } => EngineError::corrupt(format!(
                "truncated log record: need {} bytes, have {}",
                needed, available
            )),
            FrameError::Corrupt(msg) => EngineError::corrupt(msg),
        }
    }
}

impl WalRecord {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        WalRecord::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        WalRecord::Delete { key: key.into() }
    }

    pub fn delete_range(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        WalRecord::DeleteRange {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn begin_tx(tx_id: u64) -> Self {
        WalRecord::BeginTx { tx_id }
    }

    pub fn commit_tx(tx_id: u64) -> Self {
        WalRecord::CommitTx { tx_id }
    }

    pub fn checkpoint(sequence: u64) -> Self {
        WalRecord::Checkpoint { sequence }
    }

    /// Tag written into the frame header.
    pub fn record_type(&self) -> RecordType {
        match self {
            WalRecord::Put { .. } => RecordType::Put,
            WalRecord::Delete { .. } => RecordType::Delete,
            WalRecord::DeleteRange { .. } => RecordType::DeleteRange,
            WalRecord::BeginTx { .. } => RecordType::BeginTx,
            WalRecord::CommitTx { .. } => RecordType::CommitTx,
            WalRecord::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// True for records that change data (as opposed to markers).
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            WalRecord::Put { .. } | WalRecord::Delete { .. } | WalRecord::DeleteRange { .. }
        )
    }

    /// Encode into a self-delimiting, checksummed frame.
    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| EngineError::io(format!("failed to encode log record: {}", e)))?;
        let tag = self.record_type() as u8;

        let mut hasher = Hasher::new();
        hasher.update(&[tag]);
        hasher.update(&payload);
        let crc = hasher.finalize();

        let content_len = 1 + payload.len();
        let mut frame = Vec::with_capacity(content_len + 8);
        frame.extend_from_slice(&(content_len as u32).to_le_bytes());
        frame.push(tag);
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode the frame at the start of `data`, returning the record and the
    /// number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < FRAME_OVERHEAD {
            return Err(FrameError::Incomplete {
                needed: FRAME_OVERHEAD,
                available: data.len(),
            });
        }

        let content_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if content_len == 0 || content_len > MAX_RECORD_SIZE {
            return Err(FrameError::Corrupt(format!(
                "implausible record length {}",
                content_len
            )));
        }

        let total = 4 + content_len + 4;
        if data.len() < total {
            return Err(FrameError::Incomplete {
                needed: total,
                available: data.len(),
            });
        }

        let tag = data[4];
        let payload = &data[5..4 + content_len];
        let stored_crc = u32::from_le_bytes([
            data[4 + content_len],
            data[5 + content_len],
            data[6 + content_len],
            data[7 + content_len],
        ]);

        let mut hasher = Hasher::new();
        hasher.update(&[tag]);
        hasher.update(payload);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(FrameError::Corrupt(format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, actual_crc
            )));
        }

        let record_type = RecordType::try_from(tag)?;
        let record: WalRecord = bincode::deserialize(payload)
            .map_err(|e| FrameError::Corrupt(format!("undecodable payload: {}", e)))?;
        if record.record_type() != record_type {
            return Err(FrameError::Corrupt(format!(
                "header says {:?} but payload is {:?}",
                record_type,
                record.record_type()
            )));
        }

        Ok((record, total))
    }
}
