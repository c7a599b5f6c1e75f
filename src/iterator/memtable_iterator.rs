use std::{ops::Bound, sync::Arc};

use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    memtable::{EMPTY_INTERNAL_KEY, InternalKey, MemTable},
    util::Result,
};

/// Cursor over a memtable's skiplist.
///
/// Holds the memtable by `Arc` and remembers the current entry by value, so
/// each step is a fresh `O(log n)` bound search. Entries inserted after the
/// cursor was created may be observed; the user iterator filters them by
/// sequence.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(InternalKey, Bytes)>,
}

impl MemTableIterator {
    pub fn new(mem: Arc<MemTable>) -> Self {
        MemTableIterator { mem, current: None }
    }

    fn land(&mut self, found: Option<(InternalKey, Bytes)>) -> Result<bool> {
        self.current = found;
        Ok(self.current.is_some())
    }

    fn lower(&self, bound: Bound<&InternalKey>) -> Option<(InternalKey, Bytes)> {
        self.mem
            .skiplist()
            .lower_bound(bound)
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    fn upper(&self, bound: Bound<&InternalKey>) -> Option<(InternalKey, Bytes)> {
        self.mem
            .skiplist()
            .upper_bound(bound)
            .map(|e| (e.key().clone(), e.value().clone()))
    }
}

impl InternalIterator for MemTableIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        let found = self
            .mem
            .skiplist()
            .front()
            .map(|e| (e.key().clone(), e.value().clone()));
        self.land(found)
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        let found = self
            .mem
            .skiplist()
            .back()
            .map(|e| (e.key().clone(), e.value().clone()));
        self.land(found)
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        let found = self.lower(Bound::Included(target));
        self.land(found)
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        let found = self.upper(Bound::Included(target));
        self.land(found)
    }

    fn next(&mut self) -> Result<bool> {
        let found = match &self.current {
            Some((key, _)) => self.lower(Bound::Excluded(key)),
            None => None,
        };
        self.land(found)
    }

    fn prev(&mut self) -> Result<bool> {
        let found = match &self.current {
            Some((key, _)) => self.upper(Bound::Excluded(key)),
            None => None,
        };
        self.land(found)
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &InternalKey {
        match &self.current {
            Some((key, _)) => key,
            None => &EMPTY_INTERNAL_KEY,
        }
    }

    fn value(&self) -> Result<Bytes> {
        Ok(self
            .current
            .as_ref()
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }
}
