//! Memtable - the in-memory tree
//!
//! Recent writes live here, sorted by key, until a flush turns them into a
//! table file. Deletes are kept as tombstones so that they keep shadowing
//! older tables after the flush.

use std::collections::BTreeMap;
use std::ops::Bound;

/// A value or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemtableEntry {
    Value(Vec<u8>),
    Tombstone,
}

impl MemtableEntry {
    /// Approximate footprint, type tag included.
    pub fn size(&self) -> usize {
        match self {
            MemtableEntry::Value(v) => v.len() + 1,
            MemtableEntry::Tombstone => 1,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            MemtableEntry::Value(v) => Some(v),
            MemtableEntry::Tombstone => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Memtable {
    data: BTreeMap<Vec<u8>, MemtableEntry>,
    size_bytes: u64,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` under `key`, returning what it replaced.
    pub fn apply(&mut self, key: Vec<u8>, entry: MemtableEntry) -> Option<MemtableEntry> {
        let added = (key.len() + entry.size()) as u64;
        let key_len = key.len() as u64;
        let previous = self.data.insert(key, entry);
        if let Some(old) = &previous {
            self.size_bytes -= key_len + old.size() as u64;
        }
        self.size_bytes += added;
        previous
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<MemtableEntry> {
        self.apply(key, MemtableEntry::Value(value))
    }

    pub fn delete(&mut self, key: Vec<u8>) -> Option<MemtableEntry> {
        self.apply(key, MemtableEntry::Tombstone)
    }

    /// Put back what a write replaced; `None` removes the key entirely.
    pub fn restore(&mut self, key: Vec<u8>, previous: Option<MemtableEntry>) {
        match previous {
            Some(entry) => {
                self.apply(key, entry);
            }
            None => {
                if let Some(old) = self.data.remove(&key) {
                    self.size_bytes -= (key.len() + old.size()) as u64;
                }
            }
        }
    }

    /// `None` if the memtable knows nothing about `key`.
    pub fn get(&self, key: &[u8]) -> Option<&MemtableEntry> {
        self.data.get(key)
    }

    /// Smallest entry with a key above `key` (or equal, when `inclusive`).
    pub fn next_from(&self, key: &[u8], inclusive: bool) -> Option<(&[u8], &MemtableEntry)> {
        let lower = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.data
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_slice(), v))
    }

    /// Largest entry with a key below `key` (or equal, when `inclusive`).
    pub fn prev_from(&self, key: &[u8], inclusive: bool) -> Option<(&[u8], &MemtableEntry)> {
        let upper = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.data
            .range::<[u8], _>((Bound::Unbounded, upper))
            .next_back()
            .map(|(k, v)| (k.as_slice(), v))
    }

    pub fn first(&self) -> Option<(&[u8], &MemtableEntry)> {
        self.data.iter().next().map(|(k, v)| (k.as_slice(), v))
    }

    pub fn last(&self) -> Option<(&[u8], &MemtableEntry)> {
        self.data.iter().next_back().map(|(k, v)| (k.as_slice(), v))
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &MemtableEntry)> {
        self.data.iter()
    }

    /// Hand the contents over (for a flush) and leave an empty tree.
    pub fn take(&mut self) -> BTreeMap<Vec<u8>, MemtableEntry> {
        self.size_bytes = 0;
        std::mem::take(&mut self.data)
    }
}
