// Log reader - replays frames from every segment in id order
//
// A torn frame at the end of a segment (crash mid-write) ends that segment
// quietly. A frame that is complete but fails validation is reported.

use crate::record::{FrameError, WalRecord};
use crate::segment::SegmentManager;
use lsmdb_core::{EngineError, EngineResult};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct WalReader {
    segments: Vec<PathBuf>,
    next_segment: usize,
    reader: Option<BufReader<File>>,
    current: Option<PathBuf>,
    torn_tails: usize,
}

impl WalReader {
    pub fn new(wal_dir: &Path) -> EngineResult<Self> {
        let segments = SegmentManager::new(wal_dir.to_path_buf())
            .list_segments()?
            .into_iter()
            .map(|info| info.path)
            .collect();

        Ok(Self {
            segments,
            next_segment: 0,
            reader: None,
            current: None,
            torn_tails: 0,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segments that ended in a partial frame.
    pub fn torn_tails(&self) -> usize {
        self.torn_tails
    }

    fn advance_segment(&mut self) -> EngineResult<bool> {
        self.reader = None;
        self.current = None;
        let path = match self.segments.get(self.next_segment) {
            Some(path) => path.clone(),
            None => return Ok(false),
        };
        self.next_segment += 1;
        self.reader = Some(BufReader::new(File::open(&path)?));
        self.current = Some(path);
        Ok(true)
    }

    /// Read the next record, `Ok(None)` once every segment is exhausted.
    pub fn next_record(&mut self) -> EngineResult<Option<WalRecord>> {
        loop {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => {
                    if !self.advance_segment()? {
                        return Ok(None);
                    }
                    continue;
                }
            };

            match Self::read_frame(reader) {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {
                    self.reader = None;
                }
                Err(FrameError::Incomplete { needed, available }) => {
                    warn!(
                        segment = ?self.current,
                        needed,
                        available,
                        "ignoring torn record at end of log segment"
                    );
                    self.torn_tails += 1;
                    self.reader = None;
                }
                Err(err) => return Err(EngineError::from(err)),
            }
        }
    }

    /// `Ok(None)` at a clean end of segment.
    fn read_frame(reader: &mut BufReader<File>) -> Result<Option<WalRecord>, FrameError> {
        let mut len_buf = [0u8; 4];
        let got = read_up_to(reader, &mut len_buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < len_buf.len() {
            return Err(FrameError::Incomplete {
                needed: 4,
                available: got,
            });
        }

        let content_len = u32::from_le_bytes(len_buf) as usize;
        if content_len == 0 || content_len > crate::record::MAX_RECORD_SIZE {
            return Err(FrameError::Corrupt(format!(
                "implausible record length {}",
                content_len
            )));
        }

        let mut frame = vec![0u8; 4 + content_len + 4];
        frame[..4].copy_from_slice(&len_buf);
        let got = read_up_to(reader, &mut frame[4..])?;
        if got < content_len + 4 {
            return Err(FrameError::Incomplete {
                needed: frame.len(),
                available: 4 + got,
            });
        }

        WalRecord::decode(&frame).map(|(record, _)| Some(record))
    }

    pub fn read_all(&mut self) -> EngineResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Corrupt(format!("read failed: {}", e))),
        }
    }
    Ok(filled)
}

impl Iterator for WalReader {
    type Item = EngineResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
