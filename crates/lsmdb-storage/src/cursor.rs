//! Cursors - merged navigation over the memtable and every table
//!
//! A cursor only remembers the entry it sits on. Each step asks every source
//! for its neighbour of that key and takes the closest one; when several
//! sources hold the same key the newest decides, and a tombstone there means
//! the key is skipped. Cursors therefore stay usable across flushes and merges.

use crate::memtable::Memtable;
use crate::sstable::{BlockEntry, TableReader};
use lsmdb_core::{CursorId, EngineError, EngineResult, SeekMode};
use std::collections::HashMap;

/// Position of one open cursor.
#[derive(Debug, Default, Clone)]
pub struct CursorState {
    /// Key and value under the cursor
    pub current: Option<(Vec<u8>, Vec<u8>)>,
    /// Positioned by an exact-match seek; such a cursor cannot step
    pub exact: bool,
}

impl CursorState {
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }
}

/// The open cursors of one connection.
#[derive(Debug, Default)]
pub struct CursorTable {
    cursors: HashMap<CursorId, CursorState>,
    next_id: u64,
}

impl CursorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) -> CursorId {
        self.next_id += 1;
        let id = CursorId(self.next_id);
        self.cursors.insert(id, CursorState::default());
        id
    }

    pub fn close(&mut self, id: CursorId) -> EngineResult<()> {
        self.cursors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| unknown(id))
    }

    pub fn get(&self, id: CursorId) -> EngineResult<&CursorState> {
        self.cursors.get(&id).ok_or_else(|| unknown(id))
    }

    pub fn get_mut(&mut self, id: CursorId) -> EngineResult<&mut CursorState> {
        self.cursors.get_mut(&id).ok_or_else(|| unknown(id))
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Drop every cursor; returns how many were open.
    pub fn clear(&mut self) -> usize {
        let open = self.cursors.len();
        self.cursors.clear();
        open
    }
}

fn unknown(id: CursorId) -> EngineError {
    EngineError::misuse(format!("cursor {} is not open", id.0))
}

/// Read access to every source, newest last in `tables`.
pub struct MergedView<'a> {
    pub memtable: &'a Memtable,
    pub tables: &'a mut [TableReader],
}

type Found = Option<(Vec<u8>, Option<Vec<u8>>)>;

impl MergedView<'_> {
    /// Live value of `key`, if any.
    pub fn lookup(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(entry.value().map(|v| v.to_vec()));
        }
        for table in self.tables.iter_mut().rev() {
            if let Some(entry) = table.get(key)? {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }

    /// Smallest live entry above `from` (or equal, when `inclusive`).
    /// `None` for `from` starts at the very first key.
    pub fn next_live(
        &mut self,
        from: Option<&[u8]>,
        inclusive: bool,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut bound = from.map(|k| k.to_vec());
        let mut inclusive = inclusive;
        loop {
            match self.closest(bound.as_deref(), inclusive, true)? {
                None => return Ok(None),
                Some((key, Some(value))) => return Ok(Some((key, value))),
                Some((key, None)) => {
                    bound = Some(key);
                    inclusive = false;
                }
            }
        }
    }

    /// Largest live entry below `from` (or equal, when `inclusive`).
    /// `None` for `from` starts at the very last key.
    pub fn prev_live(
        &mut self,
        from: Option<&[u8]>,
        inclusive: bool,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut bound = from.map(|k| k.to_vec());
        let mut inclusive = inclusive;
        loop {
            match self.closest(bound.as_deref(), inclusive, false)? {
                None => return Ok(None),
                Some((key, Some(value))) => return Ok(Some((key, value))),
                Some((key, None)) => {
                    bound = Some(key);
                    inclusive = false;
                }
            }
        }
    }

    /// Every live key in `[start, end)`.
    pub fn live_keys_in(&mut self, start: &[u8], end: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut next = self.next_live(Some(start), true)?;
        while let Some((key, _)) = next {
            if key.as_slice() >= end {
                break;
            }
            next = self.next_live(Some(&key), false)?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Nearest key in one direction across all sources, with the newest
    /// version of it (`None` value for a tombstone).
    fn closest(&mut self, bound: Option<&[u8]>, inclusive: bool, forward: bool) -> EngineResult<Found> {
        let closer = |candidate: &[u8], best: &Found| match best {
            None => true,
            Some((key, _)) if forward => candidate < key.as_slice(),
            Some((key, _)) => candidate > key.as_slice(),
        };

        let mut best: Found = None;
        let from_memtable = match (bound, forward) {
            (Some(k), true) => self.memtable.next_from(k, inclusive),
            (Some(k), false) => self.memtable.prev_from(k, inclusive),
            (None, true) => self.memtable.first(),
            (None, false) => self.memtable.last(),
        };
        if let Some((key, entry)) = from_memtable {
            best = Some((key.to_vec(), entry.value().map(|v| v.to_vec())));
        }

        // Newest first, so a tie keeps the newer version
        for table in self.tables.iter_mut().rev() {
            let found: Option<BlockEntry> = match (bound, forward) {
                (Some(k), true) => table.next_from(k, inclusive)?,
                (Some(k), false) => table.prev_from(k, inclusive)?,
                (None, true) => table.first()?,
                (None, false) => table.last()?,
            };
            if let Some(entry) = found {
                if closer(&entry.key, &best) {
                    best = Some((entry.key, entry.value));
                }
            }
        }
        Ok(best)
    }
}

/// Where a seek for `key` in `mode` lands.
pub fn seek(
    view: &mut MergedView<'_>,
    key: &[u8],
    mode: SeekMode,
) -> EngineResult<CursorState> {
    let current = match mode {
        SeekMode::Eq => view.lookup(key)?.map(|value| (key.to_vec(), value)),
        SeekMode::Ge | SeekMode::GeFast => view.next_live(Some(key), true)?,
        SeekMode::Le => view.prev_live(Some(key), true)?,
    };
    Ok(CursorState {
        current,
        exact: mode == SeekMode::Eq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::TableWriter;
    use tempfile::TempDir;

    fn table(dir: &std::path::Path, id: u64, entries: &[(&str, Option<&str>)]) -> TableReader {
        let mut writer = TableWriter::create(dir, id, 128, None).unwrap();
        for (key, value) in entries {
            writer
                .add(&BlockEntry {
                    key: key.as_bytes().to_vec(),
                    value: value.map(|v| v.as_bytes().to_vec()),
                })
                .unwrap();
        }
        TableReader::open(dir, writer.finish(false).unwrap(), None).unwrap()
    }

    fn walk_forward(view: &mut MergedView<'_>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut pos = view.next_live(None, true).unwrap();
        while let Some((k, v)) = pos {
            pos = view.next_live(Some(&k), false).unwrap();
            out.push((String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap()));
        }
        out
    }

    fn fixture(dir: &TempDir) -> (Memtable, Vec<TableReader>) {
        let old = table(dir.path(), 1, &[("a", Some("1")), ("b", Some("1")), ("c", Some("1"))]);
        let new = table(dir.path(), 2, &[("b", None), ("d", Some("2"))]);
        let mut memtable = Memtable::new();
        memtable.put(b"c".to_vec(), b"3".to_vec());
        memtable.delete(b"d".to_vec());
        memtable.put(b"e".to_vec(), b"3".to_vec());
        (memtable, vec![old, new])
    }

    #[test]
    fn test_forward_merge_hides_tombstones() {
        let dir = TempDir::new().unwrap();
        let (memtable, mut tables) = fixture(&dir);
        let mut view = MergedView {
            memtable: &memtable,
            tables: &mut tables,
        };

        let pairs = walk_forward(&mut view);
        let expected: Vec<(String, String)> = [("a", "1"), ("c", "3"), ("e", "3")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_backward_merge() {
        let dir = TempDir::new().unwrap();
        let (memtable, mut tables) = fixture(&dir);
        let mut view = MergedView {
            memtable: &memtable,
            tables: &mut tables,
        };

        let mut keys = Vec::new();
        let mut pos = view.prev_live(None, true).unwrap();
        while let Some((k, _)) = pos {
            pos = view.prev_live(Some(&k), false).unwrap();
            keys.push(k);
        }
        assert_eq!(keys, vec![b"e".to_vec(), b"c".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_seek_modes() {
        let dir = TempDir::new().unwrap();
        let (memtable, mut tables) = fixture(&dir);
        let mut view = MergedView {
            memtable: &memtable,
            tables: &mut tables,
        };

        let eq_hit = seek(&mut view, b"c", SeekMode::Eq).unwrap();
        assert_eq!(eq_hit.current, Some((b"c".to_vec(), b"3".to_vec())));
        assert!(eq_hit.exact);
        assert!(!seek(&mut view, b"b", SeekMode::Eq).unwrap().is_valid());

        assert_eq!(seek(&mut view, b"b", SeekMode::Ge).unwrap().key(), Some(b"c".as_slice()));
        assert_eq!(seek(&mut view, b"d", SeekMode::Le).unwrap().key(), Some(b"c".as_slice()));
        assert_eq!(seek(&mut view, b"bb", SeekMode::GeFast).unwrap().key(), Some(b"c".as_slice()));
        assert!(!seek(&mut view, b"f", SeekMode::Ge).unwrap().is_valid());
        assert!(!seek(&mut view, b"0", SeekMode::Le).unwrap().is_valid());
    }

    #[test]
    fn test_live_keys_in_range() {
        let dir = TempDir::new().unwrap();
        let (memtable, mut tables) = fixture(&dir);
        let mut view = MergedView {
            memtable: &memtable,
            tables: &mut tables,
        };
        assert_eq!(
            view.live_keys_in(b"a", b"e").unwrap(),
            vec![b"a".to_vec(), b"c".to_vec()]
        );
        assert!(view.live_keys_in(b"f", b"z").unwrap().is_empty());
    }

    #[test]
    fn test_cursor_table() {
        let mut cursors = CursorTable::new();
        let a = cursors.open();
        let b = cursors.open();
        assert_ne!(a, b);
        assert_eq!(cursors.len(), 2);
        assert!(!cursors.get(a).unwrap().is_valid());

        cursors.close(a).unwrap();
        assert!(cursors.close(a).is_err());
        assert_eq!(cursors.clear(), 1);
        assert!(cursors.is_empty());
    }
}
