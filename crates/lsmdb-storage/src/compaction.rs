//! Merge work - folding several tables into one
//!
//! Inputs are a run of tables adjacent in age. For every key only the
//! newest version survives; tombstones are dropped too when the run reaches
//! down to the oldest table, since nothing older is left to shadow.

use crate::sstable::{BlockEntry, TableMeta, TableReader, TableScan, TableWriter};
use lsmdb_core::{Compressor, EngineResult};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Counters of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inputs: usize,
    pub entries_read: u64,
    pub entries_written: u64,
    /// Shadowed versions and dropped tombstones
    pub entries_removed: u64,
    pub bytes_written: u64,
    pub blocks_written: u64,
}

#[derive(Debug)]
struct MergeEntry {
    entry: BlockEntry,
    source_idx: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source_idx == other.source_idx
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on key; on equal keys the newer source pops first
        match other.entry.key.cmp(&self.entry.key) {
            Ordering::Equal => self.source_idx.cmp(&other.source_idx),
            ord => ord,
        }
    }
}

/// Where and how a merge writes its output.
pub struct MergeTarget<'a> {
    pub dir: &'a Path,
    pub table_id: u64,
    pub block_size: usize,
    pub compressor: Option<Arc<dyn Compressor>>,
    pub drop_tombstones: bool,
    pub sync: bool,
}

/// Merge `inputs` (oldest first) into one table. The output is `None` when
/// nothing survives.
pub fn merge_tables(
    inputs: &mut [TableReader],
    target: MergeTarget<'_>,
) -> EngineResult<(Option<TableMeta>, MergeStats)> {
    let mut stats = MergeStats {
        inputs: inputs.len(),
        ..MergeStats::default()
    };
    let mut scans: Vec<TableScan<'_>> = inputs.iter_mut().map(|r| r.scan()).collect();
    let mut heap = BinaryHeap::new();
    for (source_idx, scan) in scans.iter_mut().enumerate() {
        if let Some(entry) = scan.next_entry()? {
            stats.entries_read += 1;
            heap.push(MergeEntry { entry, source_idx });
        }
    }

    let mut writer = TableWriter::create(
        target.dir,
        target.table_id,
        target.block_size,
        target.compressor.clone(),
    )?;

    let result = (|| -> EngineResult<()> {
        while let Some(MergeEntry { entry, source_idx }) = heap.pop() {
            if let Some(next) = scans[source_idx].next_entry()? {
                stats.entries_read += 1;
                heap.push(MergeEntry {
                    entry: next,
                    source_idx,
                });
            }

            // Older versions of the same key
            while heap
                .peek()
                .map(|top| top.entry.key == entry.key)
                .unwrap_or(false)
            {
                if let Some(MergeEntry {
                    source_idx: older, ..
                }) = heap.pop()
                {
                    stats.entries_removed += 1;
                    if let Some(next) = scans[older].next_entry()? {
                        stats.entries_read += 1;
                        heap.push(MergeEntry {
                            entry: next,
                            source_idx: older,
                        });
                    }
                }
            }

            if entry.is_tombstone() && target.drop_tombstones {
                stats.entries_removed += 1;
                continue;
            }
            writer.add(&entry)?;
            stats.entries_written += 1;
        }
        Ok(())
    })();

    if let Err(err) = result {
        writer.abandon();
        return Err(err);
    }

    if writer.entry_count() == 0 {
        writer.abandon();
        debug!(inputs = stats.inputs, "merge produced no output");
        return Ok((None, stats));
    }

    let meta = writer.finish(target.sync)?;
    stats.bytes_written = meta.file_size;
    stats.blocks_written = meta.blocks;
    debug!(
        inputs = stats.inputs,
        output = meta.id,
        written = stats.entries_written,
        removed = stats.entries_removed,
        "tables merged"
    );
    Ok((Some(meta), stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(dir: &Path, id: u64, entries: &[(&str, Option<&str>)]) -> TableReader {
        let mut writer = TableWriter::create(dir, id, 256, None).unwrap();
        for (key, value) in entries {
            writer
                .add(&BlockEntry {
                    key: key.as_bytes().to_vec(),
                    value: value.map(|v| v.as_bytes().to_vec()),
                })
                .unwrap();
        }
        let meta = writer.finish(false).unwrap();
        TableReader::open(dir, meta, None).unwrap()
    }

    fn target(dir: &Path, drop_tombstones: bool) -> MergeTarget<'_> {
        MergeTarget {
            dir,
            table_id: 100,
            block_size: 256,
            compressor: None,
            drop_tombstones,
            sync: false,
        }
    }

    fn contents(reader: &mut TableReader) -> Vec<(String, Option<String>)> {
        let mut scan = reader.scan();
        let mut out = Vec::new();
        while let Some(entry) = scan.next_entry().unwrap() {
            out.push((
                String::from_utf8(entry.key).unwrap(),
                entry.value.map(|v| String::from_utf8(v).unwrap()),
            ));
        }
        out
    }

    #[test]
    fn test_newest_version_wins() {
        let dir = TempDir::new().unwrap();
        let mut inputs = vec![
            table(dir.path(), 1, &[("a", Some("old")), ("b", Some("old")), ("c", Some("old"))]),
            table(dir.path(), 2, &[("b", Some("new")), ("c", None)]),
        ];

        let (meta, stats) = merge_tables(&mut inputs, target(dir.path(), false)).unwrap();
        let mut merged = TableReader::open(dir.path(), meta.unwrap(), None).unwrap();
        assert_eq!(
            contents(&mut merged),
            vec![
                ("a".to_string(), Some("old".to_string())),
                ("b".to_string(), Some("new".to_string())),
                ("c".to_string(), None),
            ]
        );
        assert_eq!(stats.entries_read, 5);
        assert_eq!(stats.entries_removed, 2);
    }

    #[test]
    fn test_tombstones_dropped_at_bottom() {
        let dir = TempDir::new().unwrap();
        let mut inputs = vec![
            table(dir.path(), 1, &[("a", Some("1")), ("b", Some("2"))]),
            table(dir.path(), 2, &[("a", None)]),
        ];

        let (meta, _) = merge_tables(&mut inputs, target(dir.path(), true)).unwrap();
        let mut merged = TableReader::open(dir.path(), meta.unwrap(), None).unwrap();
        assert_eq!(contents(&mut merged), vec![("b".to_string(), Some("2".to_string()))]);
    }

    #[test]
    fn test_everything_deleted_yields_no_table() {
        let dir = TempDir::new().unwrap();
        let mut inputs = vec![
            table(dir.path(), 1, &[("a", Some("1"))]),
            table(dir.path(), 2, &[("a", None)]),
        ];

        let (meta, stats) = merge_tables(&mut inputs, target(dir.path(), true)).unwrap();
        assert!(meta.is_none());
        assert_eq!(stats.entries_written, 0);
        assert!(!dir.path().join(crate::sstable::table_file_name(100)).exists());
    }

    #[test]
    fn test_many_inputs_interleaved() {
        let dir = TempDir::new().unwrap();
        let mut inputs: Vec<TableReader> = (0..4u64)
            .map(|t| {
                let keys: Vec<String> = (0..50).map(|i| format!("k{:03}", i * 4 + t)).collect();
                let entries: Vec<(&str, Option<&str>)> =
                    keys.iter().map(|k| (k.as_str(), Some("v"))).collect();
                table(dir.path(), t + 1, &entries)
            })
            .collect();

        let (meta, stats) = merge_tables(&mut inputs, target(dir.path(), false)).unwrap();
        assert_eq!(meta.unwrap().entry_count, 200);
        assert_eq!(stats.entries_removed, 0);
    }
}
