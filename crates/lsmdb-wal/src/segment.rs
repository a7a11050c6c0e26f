// Log segment files
//
// Segments are named `wal-{id:016x}.log`; ids only grow.

use lsmdb_core::EngineResult;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// File name of segment `id`.
pub fn segment_file_name(id: u64) -> String {
    format!("{}{:016x}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX)
}

/// Parse a segment id out of a file name.
pub fn parse_segment_id(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// Lists and removes segment files of one log directory.
pub struct SegmentManager {
    wal_dir: PathBuf,
}

/// One segment file on disk.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub sequence: u64,
    pub size: u64,
}

impl SegmentManager {
    pub fn new(wal_dir: PathBuf) -> Self {
        Self { wal_dir }
    }

    /// All segments, oldest first. A missing directory has no segments.
    pub fn list_segments(&self) -> EngineResult<Vec<SegmentInfo>> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }

        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.wal_dir)? {
            let entry = entry?;
            if let Some(info) = Self::segment_info(&entry.path()) {
                segments.push(info);
            }
        }
        segments.sort_by_key(|s| s.sequence);
        Ok(segments)
    }

    fn segment_info(path: &Path) -> Option<SegmentInfo> {
        let sequence = parse_segment_id(path.file_name()?.to_str()?)?;
        let size = fs::metadata(path).ok()?.len();
        Some(SegmentInfo {
            path: path.to_path_buf(),
            sequence,
            size,
        })
    }

    pub fn total_size(&self) -> EngineResult<u64> {
        Ok(self.list_segments()?.iter().map(|s| s.size).sum())
    }

    pub fn segment_count(&self) -> EngineResult<usize> {
        Ok(self.list_segments()?.len())
    }

    pub fn latest_segment(&self) -> EngineResult<Option<SegmentInfo>> {
        Ok(self.list_segments()?.pop())
    }

    /// Delete segments whose id is below `sequence`. Returns how many went.
    pub fn cleanup_before(&self, sequence: u64) -> EngineResult<usize> {
        let mut deleted = 0;
        for segment in self.list_segments()? {
            if segment.sequence < sequence {
                fs::remove_file(&segment.path)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            debug!(deleted, before = sequence, "log segments removed");
        }
        Ok(deleted)
    }

    /// Delete every segment.
    pub fn cleanup_all(&self) -> EngineResult<usize> {
        let segments = self.list_segments()?;
        for segment in &segments {
            fs::remove_file(&segment.path)?;
        }
        Ok(segments.len())
    }
}
