//! Nested savepoints of the write transaction
//!
//! Level `n` open means levels `1..=n` are open. Every memtable change made
//! while a level is open is recorded with the entry it replaced, so any
//! level can be unwound. Log records are held back until the outermost
//! commit, then written as one group.

use crate::memtable::{Memtable, MemtableEntry};
use lsmdb_wal::WalRecord;

#[derive(Debug)]
struct UndoRecord {
    key: Vec<u8>,
    previous: Option<MemtableEntry>,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    undo_len: usize,
    pending_len: usize,
}

#[derive(Debug, Default)]
pub struct Savepoints {
    marks: Vec<Mark>,
    undo: Vec<UndoRecord>,
    pending: Vec<WalRecord>,
}

impl Savepoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open levels.
    pub fn level(&self) -> u32 {
        self.marks.len() as u32
    }

    pub fn is_open(&self) -> bool {
        !self.marks.is_empty()
    }

    /// Open levels up to `level`. Lower or equal levels are left alone.
    pub fn begin(&mut self, level: u32) {
        while self.level() < level {
            self.marks.push(Mark {
                undo_len: self.undo.len(),
                pending_len: self.pending.len(),
            });
        }
    }

    /// Remember that `key` held `previous` before the current write.
    pub fn record_undo(&mut self, key: Vec<u8>, previous: Option<MemtableEntry>) {
        if self.is_open() {
            self.undo.push(UndoRecord { key, previous });
        }
    }

    /// Hold a log record back until the outermost commit.
    pub fn defer_log(&mut self, record: WalRecord) {
        self.pending.push(record);
    }

    /// Close every level above `level`. Closing the last one returns the
    /// held-back log records, which are now committed.
    pub fn commit(&mut self, level: u32) -> Option<Vec<WalRecord>> {
        if level >= self.level() {
            return None;
        }
        self.marks.truncate(level as usize);
        if level == 0 {
            self.undo.clear();
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    /// Unwind to the start of `level`, leaving `level` levels open. Returns
    /// the number of memtable changes undone.
    pub fn rollback(&mut self, level: u32, memtable: &mut Memtable) -> usize {
        if !self.is_open() || level > self.level() {
            return 0;
        }
        let mark = self.marks[level.saturating_sub(1) as usize];

        let mut undone = 0;
        while self.undo.len() > mark.undo_len {
            if let Some(record) = self.undo.pop() {
                memtable.restore(record.key, record.previous);
                undone += 1;
            }
        }
        self.pending.truncate(mark.pending_len);
        self.marks.truncate(level as usize);
        undone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(sp: &mut Savepoints, mt: &mut Memtable, key: &str, value: &str) {
        let previous = mt.put(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        sp.record_undo(key.as_bytes().to_vec(), previous);
        sp.defer_log(WalRecord::put(key.as_bytes().to_vec(), value.as_bytes().to_vec()));
    }

    fn value(mt: &Memtable, key: &str) -> Option<Vec<u8>> {
        mt.get(key.as_bytes())
            .and_then(|e| e.value())
            .map(|v| v.to_vec())
    }

    #[test]
    fn test_begin_is_idempotent_per_level() {
        let mut sp = Savepoints::new();
        sp.begin(2);
        sp.begin(1);
        assert_eq!(sp.level(), 2);
        sp.begin(3);
        assert_eq!(sp.level(), 3);
    }

    #[test]
    fn test_inner_rollback_keeps_outer_work() {
        let mut sp = Savepoints::new();
        let mut mt = Memtable::new();

        sp.begin(1);
        write(&mut sp, &mut mt, "a", "outer");
        sp.begin(2);
        write(&mut sp, &mut mt, "a", "inner");
        write(&mut sp, &mut mt, "b", "inner");

        assert_eq!(sp.rollback(2, &mut mt), 2);
        assert_eq!(sp.level(), 2);
        assert_eq!(value(&mt, "a"), Some(b"outer".to_vec()));
        assert!(mt.get(b"b").is_none());

        let committed = sp.commit(0).expect("outermost commit");
        assert_eq!(committed, vec![WalRecord::put(b"a".to_vec(), b"outer".to_vec())]);
        assert_eq!(sp.level(), 0);
    }

    #[test]
    fn test_rollback_zero_closes_everything() {
        let mut sp = Savepoints::new();
        let mut mt = Memtable::new();
        mt.put(b"a".to_vec(), b"before".to_vec());

        sp.begin(3);
        write(&mut sp, &mut mt, "a", "during");
        sp.rollback(0, &mut mt);

        assert_eq!(sp.level(), 0);
        assert_eq!(value(&mt, "a"), Some(b"before".to_vec()));
        assert!(sp.commit(0).is_none());
    }

    #[test]
    fn test_nested_commit_defers_log() {
        let mut sp = Savepoints::new();
        let mut mt = Memtable::new();

        sp.begin(2);
        write(&mut sp, &mut mt, "k", "v");
        assert!(sp.commit(1).is_none());
        assert_eq!(sp.level(), 1);

        // Committed level 2 work is still undone by rolling back level 1
        sp.rollback(1, &mut mt);
        assert!(mt.get(b"k").is_none());
        assert_eq!(sp.commit(0).map(|r| r.len()), Some(0));
    }

    #[test]
    fn test_out_of_range_levels_are_ignored() {
        let mut sp = Savepoints::new();
        let mut mt = Memtable::new();
        sp.begin(1);
        assert!(sp.commit(1).is_none());
        assert_eq!(sp.level(), 1);
        assert_eq!(sp.rollback(5, &mut mt), 0);
        assert_eq!(sp.level(), 1);
    }
}
