// Log writer - appends framed records to the newest segment
use crate::record::WalRecord;
use crate::segment::{segment_file_name, SegmentManager};
use crate::SyncMode;
use lsmdb_core::{EngineError, EngineResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct WalWriter {
    file: BufWriter<File>,
    wal_dir: PathBuf,
    current_segment: PathBuf,
    segment_id: u64,
    current_size: u64,
    max_segment_size: u64,
    sync_mode: SyncMode,
    records_written: u64,
    bytes_written: u64,
}

impl WalWriter {
    /// Open the newest segment under `wal_dir` for appending, creating the
    /// directory and a first segment when there are none.
    pub fn new(wal_dir: &Path, max_segment_size: u64, sync_mode: SyncMode) -> EngineResult<Self> {
        std::fs::create_dir_all(wal_dir)?;

        let segments = SegmentManager::new(wal_dir.to_path_buf());
        let segment_id = segments
            .latest_segment()?
            .map(|info| info.sequence)
            .unwrap_or(0);

        let (file, path) = Self::open_segment(wal_dir, segment_id)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        debug!(segment = %path.display(), size = current_size, "log segment opened");

        Ok(Self {
            file: BufWriter::new(file),
            wal_dir: wal_dir.to_path_buf(),
            current_segment: path,
            segment_id,
            current_size,
            max_segment_size,
            sync_mode,
            records_written: 0,
            bytes_written: 0,
        })
    }

    fn open_segment(wal_dir: &Path, segment_id: u64) -> EngineResult<(File, PathBuf)> {
        let path = wal_dir.join(segment_file_name(segment_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                EngineError::new(
                    EngineError::from(e).status,
                    format!("cannot open log segment {}", path.display()),
                )
            })?;
        Ok((file, path))
    }

    /// Append one record and hand it to the OS (fsyncing it too in
    /// [`SyncMode::Sync`]). Returns the number of records written by this
    /// writer.
    pub fn append(&mut self, record: &WalRecord) -> EngineResult<u64> {
        self.write_frame(record)?;
        self.settle()?;
        Ok(self.records_written)
    }

    /// Append several records, settling them once at the end.
    pub fn append_batch(&mut self, records: &[WalRecord]) -> EngineResult<u64> {
        for record in records {
            self.write_frame(record)?;
        }
        self.settle()?;
        Ok(self.records_written)
    }

    fn write_frame(&mut self, record: &WalRecord) -> EngineResult<()> {
        let frame = record.encode()?;
        let frame_len = frame.len() as u64;

        if self.current_size > 0 && self.current_size + frame_len > self.max_segment_size {
            self.rotate_segment()?;
        }

        self.file.write_all(&frame)?;
        self.current_size += frame_len;
        self.bytes_written += frame_len;
        self.records_written += 1;
        Ok(())
    }

    /// Push buffered frames out of the process. Only `Sync` waits for the disk.
    fn settle(&mut self) -> EngineResult<()> {
        self.file.flush()?;
        if self.sync_mode == SyncMode::Sync {
            self.file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flush buffered frames and fsync the segment.
    pub fn sync(&mut self) -> EngineResult<()> {
        self.file.flush()?;
        if self.sync_mode != SyncMode::None {
            self.file.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn rotate_segment(&mut self) -> EngineResult<()> {
        self.sync()?;

        let next_id = self.segment_id + 1;
        let (file, path) = Self::open_segment(&self.wal_dir, next_id)?;

        debug!(from = self.segment_id, to = next_id, "log segment rotated");

        self.file = BufWriter::new(file);
        self.current_segment = path;
        self.segment_id = next_id;
        self.current_size = 0;
        Ok(())
    }

    pub fn current_segment_path(&self) -> &Path {
        &self.current_segment
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    pub fn current_segment_size(&self) -> u64 {
        self.current_size
    }

    /// Records appended through this writer.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Frame bytes appended through this writer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        // Best effort
        let _ = self.file.flush();
    }
}
