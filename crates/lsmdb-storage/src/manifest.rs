//! Manifest - which table files make up the store
//!
//! The whole state is small, so it is rewritten as one snapshot on every
//! change: `[crc32 u32 LE][bincode ManifestSnapshot]`, written to a temporary
//! file and renamed over `MANIFEST`.

use crate::sstable::TableMeta;
use lsmdb_core::compress::COMPRESSION_NONE;
use lsmdb_core::{EngineError, EngineResult, Status};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub version: u32,
    /// Id the next table file will get
    pub next_table_id: u64,
    /// Compressor every table is written with
    pub compressor_id: u32,
    /// Live tables, oldest first
    pub tables: Vec<TableMeta>,
}

impl Default for ManifestSnapshot {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            next_table_id: 1,
            compressor_id: COMPRESSION_NONE,
            tables: Vec::new(),
        }
    }
}

pub struct Manifest {
    dir: PathBuf,
    snapshot: ManifestSnapshot,
    exists: bool,
}

impl Manifest {
    /// Load the manifest under `dir`. A missing file yields an empty store.
    pub fn load(dir: &Path) -> EngineResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let (snapshot, exists) = if path.exists() {
            (Self::read_snapshot(&path)?, true)
        } else {
            (ManifestSnapshot::default(), false)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            snapshot,
            exists,
        })
    }

    fn read_snapshot(path: &Path) -> EngineResult<ManifestSnapshot> {
        let bytes = fs::read(path)?;
        if bytes.len() < 4 {
            return Err(EngineError::corrupt("manifest is truncated"));
        }
        let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if crc32fast::hash(&bytes[4..]) != stored {
            return Err(EngineError::corrupt("manifest failed its checksum"));
        }
        let snapshot: ManifestSnapshot = bincode::deserialize(&bytes[4..])
            .map_err(|e| EngineError::corrupt(format!("undecodable manifest: {}", e)))?;
        if snapshot.version != MANIFEST_VERSION {
            return Err(EngineError::new(
                Status::Mismatch,
                format!("manifest version {} is not supported", snapshot.version),
            ));
        }
        Ok(snapshot)
    }

    /// Write the current snapshot. With `sync`, data and rename are fsynced.
    pub fn persist(&mut self, sync: bool) -> EngineResult<()> {
        let body = bincode::serialize(&self.snapshot)
            .map_err(|e| EngineError::io(format!("failed to encode manifest: {}", e)))?;
        let temp = self.dir.join(MANIFEST_TEMP);
        {
            let mut file = File::create(&temp)?;
            file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            file.write_all(&body)?;
            if sync {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, self.dir.join(MANIFEST_FILE))?;
        if sync {
            // Directory fsync is not available everywhere; the rename is still atomic.
            if let Ok(dir) = File::open(&self.dir) {
                let _ = dir.sync_all();
            }
        }
        self.exists = true;
        debug!(tables = self.snapshot.tables.len(), "manifest written");
        Ok(())
    }

    /// Whether a manifest was found on disk or has been written.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn snapshot(&self) -> &ManifestSnapshot {
        &self.snapshot
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.snapshot.tables
    }

    pub fn compressor_id(&self) -> u32 {
        self.snapshot.compressor_id
    }

    pub fn set_compressor_id(&mut self, id: u32) {
        self.snapshot.compressor_id = id;
    }

    /// Reserve an id for a new table file.
    pub fn allocate_table_id(&mut self) -> u64 {
        let id = self.snapshot.next_table_id;
        self.snapshot.next_table_id += 1;
        id
    }

    /// Register a freshly flushed table as the newest one.
    pub fn add_table(&mut self, meta: TableMeta) {
        self.snapshot.tables.push(meta);
    }

    /// Replace the tables with ids in `inputs` (which must be adjacent in
    /// age order) by `output`, keeping its place in the age order.
    pub fn replace_tables(&mut self, inputs: &[u64], output: Option<TableMeta>) -> EngineResult<()> {
        let position = self
            .snapshot
            .tables
            .iter()
            .position(|t| inputs.contains(&t.id))
            .ok_or_else(|| EngineError::misuse("merge inputs are not in the manifest"))?;
        let before = self.snapshot.tables.len();
        self.snapshot.tables.retain(|t| !inputs.contains(&t.id));
        if before - self.snapshot.tables.len() != inputs.len() {
            return Err(EngineError::misuse("merge inputs are not all in the manifest"));
        }
        if let Some(meta) = output {
            self.snapshot.tables.insert(position, meta);
        }
        Ok(())
    }

    /// Table files in the directory that no snapshot refers to.
    pub fn orphans(&self) -> EngineResult<Vec<PathBuf>> {
        let mut orphans = Vec::new();
        if !self.dir.exists() {
            return Ok(orphans);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if name.ends_with(".sst") => name.to_string(),
                _ => continue,
            };
            if !self.snapshot.tables.iter().any(|t| t.file_name == name) {
                orphans.push(path);
            }
        }
        Ok(orphans)
    }
}
