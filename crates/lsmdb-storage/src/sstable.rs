//! Table files - immutable sorted runs
//!
//! ## File Format
//!
//! ```text
//! +------------------+
//! | Data Blocks      |  <- header + (optionally compressed) entries + CRC
//! +------------------+
//! | Index            |  <- first/last key and location of every block
//! +------------------+
//! | Footer           |  <- index location, key range, compressor id, magic, CRC
//! +------------------+
//! | Footer length    |  <- u32 LE
//! +------------------+
//! ```
//!
//! A data block is `[flags u8][raw_len u32][stored_len u32][stored bytes][crc32 u32]`.
//! The CRC covers the header and the stored bytes. Bit 0 of `flags` says the
//! stored bytes went through the table's compressor.

use crate::memtable::MemtableEntry;
use lsmdb_core::compress::COMPRESSION_NONE;
use lsmdb_core::{Compressor, EngineError, EngineResult, Status};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TABLE_MAGIC: u64 = 0x4C53_4D44_4254_4C31;

const BLOCK_HEADER_LEN: usize = 1 + 4 + 4;
const FLAG_COMPRESSED: u8 = 0x01;

/// One key and its value, or its tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub key: Vec<u8>,
    /// `None` marks a deletion
    pub value: Option<Vec<u8>>,
}

impl BlockEntry {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn from_memtable(key: Vec<u8>, entry: MemtableEntry) -> Self {
        let value = match entry {
            MemtableEntry::Value(v) => Some(v),
            MemtableEntry::Tombstone => None,
        };
        Self { key, value }
    }
}

/// Location and key range of one data block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub offset: u64,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableFooter {
    index_offset: u64,
    index_size: u32,
    entry_count: u64,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    compressor_id: u32,
    magic: u64,
    crc: u32,
}

impl TableFooter {
    fn checksum(&self) -> EngineResult<u32> {
        let unsealed = TableFooter {
            crc: 0,
            ..self.clone()
        };
        Ok(crc32fast::hash(&encode(&unsealed)?))
    }
}

/// What the manifest remembers about a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: u64,
    pub file_name: String,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub entry_count: u64,
    pub file_size: u64,
    pub blocks: u64,
}

/// File name of table `id`.
pub fn table_file_name(id: u64) -> String {
    format!("{:016x}.sst", id)
}

fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EngineError::io(format!("encode failed: {}", e)))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> EngineResult<T> {
    bincode::deserialize(bytes)
        .map_err(|e| EngineError::corrupt(format!("undecodable {}: {}", what, e)))
}

fn compressor_id(compressor: &Option<Arc<dyn Compressor>>) -> u32 {
    compressor.as_ref().map(|c| c.id()).unwrap_or(COMPRESSION_NONE)
}

/// Streams sorted entries into a new table file.
pub struct TableWriter {
    id: u64,
    path: PathBuf,
    writer: BufWriter<File>,
    compressor: Option<Arc<dyn Compressor>>,
    position: u64,
    index: Vec<IndexEntry>,
    block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,
    block_last_key: Vec<u8>,
    block_size: usize,
    entry_count: u64,
    min_key: Option<Vec<u8>>,
}

impl TableWriter {
    /// Create `dir/<id>.sst`. Blocks are cut once they reach `block_size`
    /// uncompressed bytes.
    pub fn create(
        dir: &Path,
        id: u64,
        block_size: usize,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> EngineResult<Self> {
        let path = dir.join(table_file_name(id));
        let file = File::create(&path)?;
        Ok(Self {
            id,
            path,
            writer: BufWriter::new(file),
            compressor,
            position: 0,
            index: Vec::new(),
            block: Vec::with_capacity(block_size),
            block_first_key: None,
            block_last_key: Vec::new(),
            block_size: block_size.max(64),
            entry_count: 0,
            min_key: None,
        })
    }

    /// Append one entry. Keys must arrive in strictly increasing order.
    pub fn add(&mut self, entry: &BlockEntry) -> EngineResult<()> {
        if self.entry_count > 0 && entry.key <= self.block_last_key {
            return Err(EngineError::misuse("table keys must be added in increasing order"));
        }
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
        }
        self.block_last_key = entry.key.clone();

        let encoded = encode(entry)?;
        self.block
            .extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        self.block.extend_from_slice(&encoded);
        self.entry_count += 1;

        if self.block.len() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> EngineResult<()> {
        let first_key = match self.block_first_key.take() {
            Some(key) => key,
            None => return Ok(()),
        };

        let raw_len = self.block.len();
        let (flags, stored) = match &self.compressor {
            Some(codec) => {
                let packed = codec.compress(&self.block)?;
                if packed.len() < raw_len {
                    (FLAG_COMPRESSED, packed)
                } else {
                    (0, std::mem::take(&mut self.block))
                }
            }
            None => (0, std::mem::take(&mut self.block)),
        };

        let mut frame = Vec::with_capacity(BLOCK_HEADER_LEN + stored.len() + 4);
        frame.push(flags);
        frame.extend_from_slice(&(raw_len as u32).to_le_bytes());
        frame.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        frame.extend_from_slice(&stored);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        self.writer.write_all(&frame)?;
        self.index.push(IndexEntry {
            first_key,
            last_key: self.block_last_key.clone(),
            offset: self.position,
            size: frame.len() as u32,
        });
        self.position += frame.len() as u64;
        self.block.clear();
        Ok(())
    }

    /// Blocks written so far.
    pub fn blocks(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Write index and footer. With `sync`, the file is fsynced before returning.
    pub fn finish(mut self, sync: bool) -> EngineResult<TableMeta> {
        self.flush_block()?;

        let index_offset = self.position;
        let index = encode(&self.index)?;
        self.writer.write_all(&index)?;
        self.position += index.len() as u64;

        let min_key = self.min_key.take().unwrap_or_default();
        let max_key = self.block_last_key.clone();
        let mut footer = TableFooter {
            index_offset,
            index_size: index.len() as u32,
            entry_count: self.entry_count,
            min_key: min_key.clone(),
            max_key: max_key.clone(),
            compressor_id: compressor_id(&self.compressor),
            magic: TABLE_MAGIC,
            crc: 0,
        };
        footer.crc = footer.checksum()?;
        let footer_bytes = encode(&footer)?;
        self.writer.write_all(&footer_bytes)?;
        self.writer
            .write_all(&(footer_bytes.len() as u32).to_le_bytes())?;
        self.position += footer_bytes.len() as u64 + 4;

        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_all()?;
        }

        Ok(TableMeta {
            id: self.id,
            file_name: table_file_name(self.id),
            min_key,
            max_key,
            entry_count: self.entry_count,
            file_size: self.position,
            blocks: self.index.len() as u64,
        })
    }

    /// Give up on the table and delete the partial file.
    pub fn abandon(self) {
        let path = self.path.clone();
        drop(self);
        let _ = fs::remove_file(path);
    }
}

/// Random access to one table file, with a one-block cache.
pub struct TableReader {
    meta: TableMeta,
    file: File,
    index: Vec<IndexEntry>,
    compressor: Option<Arc<dyn Compressor>>,
    cached: Option<(usize, Vec<BlockEntry>)>,
    blocks_read: u64,
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("meta", &self.meta)
            .field("blocks", &self.index.len())
            .finish()
    }
}

impl TableReader {
    /// Open `dir/<meta.file_name>`. The file must have been written with the
    /// same compressor (or lack of one) as `compressor`.
    pub fn open(
        dir: &Path,
        meta: TableMeta,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> EngineResult<Self> {
        let path = dir.join(&meta.file_name);
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < 4 {
            return Err(EngineError::corrupt(format!("{} is truncated", path.display())));
        }

        file.seek(SeekFrom::End(-4))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let footer_len = u32::from_le_bytes(len_buf) as u64;
        if footer_len + 4 > file_size {
            return Err(EngineError::corrupt(format!(
                "{} has an impossible footer length",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(file_size - 4 - footer_len))?;
        let mut footer_buf = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_buf)?;
        let footer: TableFooter = decode(&footer_buf, "table footer")?;

        if footer.magic != TABLE_MAGIC || footer.crc != footer.checksum()? {
            return Err(EngineError::corrupt(format!(
                "{} has a damaged footer",
                path.display()
            )));
        }
        let expected = compressor_id(&compressor);
        if footer.compressor_id != expected {
            return Err(EngineError::new(
                Status::Mismatch,
                format!(
                    "{} was written with compressor {}, store is configured for {}",
                    path.display(),
                    footer.compressor_id,
                    expected
                ),
            ));
        }

        let index_end = footer.index_offset.checked_add(u64::from(footer.index_size));
        if index_end.map_or(true, |end| end > file_size - 4 - footer_len) {
            return Err(EngineError::corrupt(format!(
                "{} has an index outside the file",
                path.display()
            )));
        }
        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index_buf = vec![0u8; footer.index_size as usize];
        file.read_exact(&mut index_buf)?;
        let index: Vec<IndexEntry> = decode(&index_buf, "table index")?;
        if index
            .iter()
            .any(|block| block.offset.saturating_add(u64::from(block.size)) > footer.index_offset)
        {
            return Err(EngineError::corrupt(format!(
                "{} indexes a block past its data section",
                path.display()
            )));
        }

        Ok(Self {
            meta,
            file,
            index,
            compressor,
            cached: None,
            blocks_read: 0,
        })
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    /// Blocks fetched from disk (cache misses).
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Entries of block `idx`, from cache when possible.
    pub fn block(&mut self, idx: usize) -> EngineResult<&[BlockEntry]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == idx);
        if !hit {
            let entries = self.read_block(idx)?;
            self.cached = Some((idx, entries));
        }
        match &self.cached {
            Some((_, entries)) => Ok(entries),
            None => Err(EngineError::misuse("block cache empty after load")),
        }
    }

    fn read_block(&mut self, idx: usize) -> EngineResult<Vec<BlockEntry>> {
        let location = self
            .index
            .get(idx)
            .ok_or_else(|| EngineError::misuse(format!("block {} out of range", idx)))?;

        let mut frame = vec![0u8; location.size as usize];
        self.file.seek(SeekFrom::Start(location.offset))?;
        self.file.read_exact(&mut frame)?;
        self.blocks_read += 1;

        if frame.len() < BLOCK_HEADER_LEN + 4 {
            return Err(EngineError::corrupt("block shorter than its header"));
        }
        let body_end = frame.len() - 4;
        let stored_crc = u32::from_le_bytes([
            frame[body_end],
            frame[body_end + 1],
            frame[body_end + 2],
            frame[body_end + 3],
        ]);
        if crc32fast::hash(&frame[..body_end]) != stored_crc {
            return Err(EngineError::corrupt(format!(
                "block {} of {} failed its checksum",
                idx, self.meta.file_name
            )));
        }

        let flags = frame[0];
        let raw_len = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        let stored_len = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]) as usize;
        if BLOCK_HEADER_LEN + stored_len != body_end {
            return Err(EngineError::corrupt("block length fields disagree"));
        }
        let stored = &frame[BLOCK_HEADER_LEN..body_end];

        let raw = if flags & FLAG_COMPRESSED != 0 {
            let codec = self.compressor.as_ref().ok_or_else(|| {
                EngineError::new(Status::Mismatch, "compressed block without a compressor")
            })?;
            let raw = codec.uncompress(stored, raw_len)?;
            if raw.len() != raw_len {
                return Err(EngineError::corrupt(format!(
                    "block inflated to {} bytes, expected {}",
                    raw.len(),
                    raw_len
                )));
            }
            raw
        } else {
            stored.to_vec()
        };

        parse_entries(&raw)
    }

    /// Exact lookup.
    pub fn get(&mut self, key: &[u8]) -> EngineResult<Option<BlockEntry>> {
        match self.next_from(key, true)? {
            Some(entry) if entry.key == key => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Smallest entry with a key above `key` (or equal, when `inclusive`).
    pub fn next_from(&mut self, key: &[u8], inclusive: bool) -> EngineResult<Option<BlockEntry>> {
        let idx = self.index.partition_point(|b| {
            if inclusive {
                b.last_key.as_slice() < key
            } else {
                b.last_key.as_slice() <= key
            }
        });
        if idx >= self.index.len() {
            return Ok(None);
        }
        let entries = self.block(idx)?;
        let pos = entries.partition_point(|e| {
            if inclusive {
                e.key.as_slice() < key
            } else {
                e.key.as_slice() <= key
            }
        });
        Ok(entries.get(pos).cloned())
    }

    /// Largest entry with a key below `key` (or equal, when `inclusive`).
    pub fn prev_from(&mut self, key: &[u8], inclusive: bool) -> EngineResult<Option<BlockEntry>> {
        let idx = self.index.partition_point(|b| {
            if inclusive {
                b.first_key.as_slice() <= key
            } else {
                b.first_key.as_slice() < key
            }
        });
        if idx == 0 {
            return Ok(None);
        }
        let entries = self.block(idx - 1)?;
        let pos = entries.partition_point(|e| {
            if inclusive {
                e.key.as_slice() <= key
            } else {
                e.key.as_slice() < key
            }
        });
        Ok(pos.checked_sub(1).and_then(|p| entries.get(p)).cloned())
    }

    pub fn first(&mut self) -> EngineResult<Option<BlockEntry>> {
        if self.index.is_empty() {
            return Ok(None);
        }
        Ok(self.block(0)?.first().cloned())
    }

    pub fn last(&mut self) -> EngineResult<Option<BlockEntry>> {
        match self.index.len() {
            0 => Ok(None),
            n => Ok(self.block(n - 1)?.last().cloned()),
        }
    }

    /// Every entry, in key order.
    pub fn scan(&mut self) -> TableScan<'_> {
        TableScan {
            reader: self,
            block_idx: 0,
            entries: Vec::new(),
            pos: 0,
        }
    }
}

fn parse_entries(raw: &[u8]) -> EngineResult<Vec<BlockEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < raw.len() {
        if offset + 4 > raw.len() {
            return Err(EngineError::corrupt("block entry header cut short"));
        }
        let len = u32::from_le_bytes([
            raw[offset],
            raw[offset + 1],
            raw[offset + 2],
            raw[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > raw.len() {
            return Err(EngineError::corrupt("block entry cut short"));
        }
        entries.push(decode(&raw[offset..offset + len], "block entry")?);
        offset += len;
    }
    Ok(entries)
}

/// Sequential pass over a table, one block in memory at a time.
pub struct TableScan<'a> {
    reader: &'a mut TableReader,
    block_idx: usize,
    entries: Vec<BlockEntry>,
    pos: usize,
}

impl TableScan<'_> {
    pub fn next_entry(&mut self) -> EngineResult<Option<BlockEntry>> {
        loop {
            if self.pos < self.entries.len() {
                let entry = std::mem::take(&mut self.entries[self.pos]);
                self.pos += 1;
                return Ok(Some(entry));
            }
            if self.block_idx >= self.reader.block_count() {
                return Ok(None);
            }
            self.entries = self.reader.read_block(self.block_idx)?;
            self.block_idx += 1;
            self.pos = 0;
        }
    }
}

/// Remove a table file.
pub fn delete_table(dir: &Path, meta: &TableMeta) -> EngineResult<()> {
    fs::remove_file(dir.join(&meta.file_name))?;
    Ok(())
}
