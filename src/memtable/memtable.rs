use std::{
    ops::Bound,
    sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use crate::memtable::{
    internal_key::{InternalKey, MAX_SEQUENCE, ValueKind},
    range_del::RangeTombstone,
};

/// Newest version of a key found by a point lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub sequence: u64,
    pub kind: ValueKind,
    pub value: Bytes,
}

/// In-memory write buffer of one column family.
///
/// Point entries live in a lock-free skiplist ordered by `InternalKey`;
/// range deletions are kept aside and consulted by readers. Inserts are
/// serialized by the database write lock, reads are concurrent.
pub struct MemTable {
    table: SkipMap<InternalKey, Bytes>,
    range_tombstones: RwLock<Vec<RangeTombstone>>,
    approximate_memory: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        MemTable {
            table: SkipMap::new(),
            range_tombstones: RwLock::new(Vec::new()),
            approximate_memory: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, sequence: u64, kind: ValueKind, key: &[u8], value: &[u8]) {
        let internal_key = InternalKey::new(Bytes::copy_from_slice(key), sequence, kind);
        self.approximate_memory
            .fetch_add(internal_key.encoded_len() + value.len(), Ordering::Relaxed);
        self.table
            .insert(internal_key, Bytes::copy_from_slice(value));
    }

    pub fn delete_range(&self, sequence: u64, start: &[u8], end: &[u8]) {
        self.approximate_memory
            .fetch_add(start.len() + end.len() + 8, Ordering::Relaxed);
        self.range_tombstones.write().push(RangeTombstone::new(
            Bytes::copy_from_slice(start),
            Bytes::copy_from_slice(end),
            sequence,
        ));
    }

    /// Newest point entry for `key` with sequence <= `read_sequence`
    pub fn get(&self, key: &[u8], read_sequence: u64) -> Option<LookupEntry> {
        let target = InternalKey::for_seek(key, read_sequence);
        let entry = self.table.lower_bound(Bound::Included(&target))?;
        if entry.key().user_key() != key {
            return None;
        }
        Some(LookupEntry {
            sequence: entry.key().sequence(),
            kind: entry.key().kind(),
            value: entry.value().clone(),
        })
    }

    /// Highest sequence that touched `key`, including range deletions
    pub fn latest_sequence(&self, key: &[u8]) -> Option<u64> {
        let point = self.get(key, MAX_SEQUENCE).map(|e| e.sequence);
        let ranged = self
            .range_tombstones
            .read()
            .iter()
            .filter(|t| t.covers(key))
            .map(|t| t.sequence)
            .max();
        point.max(ranged)
    }

    pub fn range_tombstones(&self) -> Vec<RangeTombstone> {
        self.range_tombstones.read().clone()
    }

    pub(crate) fn skiplist(&self) -> &SkipMap<InternalKey, Bytes> {
        &self.table
    }

    /// Every point entry in internal-key order
    pub fn entries(&self) -> impl Iterator<Item = (InternalKey, Bytes)> + '_ {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.range_tombstones.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory.load(Ordering::Relaxed)
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_honours_read_sequence() {
        let mem = MemTable::new();
        mem.add(1, ValueKind::Value, b"k", b"v1");
        mem.add(5, ValueKind::Value, b"k", b"v5");
        mem.add(9, ValueKind::Deletion, b"k", b"");

        assert_eq!(mem.get(b"k", 0), None);
        assert_eq!(mem.get(b"k", 4).unwrap().value, Bytes::from_static(b"v1"));
        assert_eq!(mem.get(b"k", 8).unwrap().value, Bytes::from_static(b"v5"));
        assert_eq!(mem.get(b"k", 9).unwrap().kind, ValueKind::Deletion);
    }

    #[test]
    fn test_get_does_not_match_neighbour_keys() {
        let mem = MemTable::new();
        mem.add(3, ValueKind::Value, b"ka", b"x");
        mem.add(4, ValueKind::Value, b"kc", b"y");
        assert!(mem.get(b"kb", 10).is_none());
        assert!(mem.get(b"k", 10).is_none());
    }

    #[test]
    fn test_latest_sequence_includes_range_deletes() {
        let mem = MemTable::new();
        mem.add(2, ValueKind::Value, b"m", b"1");
        assert_eq!(mem.latest_sequence(b"m"), Some(2));

        mem.delete_range(7, b"a", b"z");
        assert_eq!(mem.latest_sequence(b"m"), Some(7));
        assert_eq!(mem.latest_sequence(b"zz"), None);
    }

    #[test]
    fn test_memory_accounting_and_emptiness() {
        let mem = MemTable::new();
        assert!(mem.is_empty());
        mem.delete_range(1, b"a", b"b");
        assert!(!mem.is_empty());
        assert_eq!(mem.len(), 0);

        mem.add(2, ValueKind::Value, b"key", b"value");
        assert_eq!(mem.len(), 1);
        assert!(mem.approximate_memory_usage() > 8);
    }
}
