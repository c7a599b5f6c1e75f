use parking_lot::RwLock;

use crate::{
    column_family::ColumnFamilyHandle,
    util::{Result, Status},
};

/// Index-addressed table of column family handles.
///
/// Slots are fixed at open: index `i` holds family `"i"` and the last slot
/// holds `"default"`. Dropping a family leaves a tombstone (`None`) in its
/// slot; slots are never shifted or reused, so indices held by callers stay
/// meaningful.
pub struct ColumnFamilySet {
    slots: RwLock<Vec<Option<ColumnFamilyHandle>>>,
}

impl ColumnFamilySet {
    pub fn new(handles: Vec<ColumnFamilyHandle>) -> Self {
        ColumnFamilySet {
            slots: RwLock::new(handles.into_iter().map(Some).collect()),
        }
    }

    /// Handle at `index`, `None` when out of range or dropped
    pub fn get(&self, index: usize) -> Option<ColumnFamilyHandle> {
        self.slots.read().get(index).cloned().flatten()
    }

    /// Like `get`, failing with `InvalidArgument`
    pub fn require(&self, index: usize) -> Result<ColumnFamilyHandle> {
        self.get(index).ok_or_else(|| {
            Status::invalid_argument(format!("No live column family at index {index}"))
        })
    }

    /// Index of "default": always the last slot
    pub fn default_index(&self) -> usize {
        self.slots.read().len().saturating_sub(1)
    }

    /// Number of slots, tombstones included
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Replace the slot with a tombstone, returning what was there
    pub fn tombstone(&self, index: usize) -> Option<ColumnFamilyHandle> {
        self.slots.write().get_mut(index).and_then(Option::take)
    }

    /// Every live handle in index order
    pub fn live(&self) -> Vec<ColumnFamilyHandle> {
        self.slots.read().iter().flatten().cloned().collect()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        column_family::{ColumnFamilyData, ColumnFamilyOptions},
        version::Version,
    };

    fn handle(index: usize, name: &str) -> ColumnFamilyHandle {
        let data = ColumnFamilyData::new(
            index as u32,
            name.to_string(),
            ColumnFamilyOptions::default(),
            Version::empty(),
        );
        ColumnFamilyHandle::new(index, Arc::new(data))
    }

    #[test]
    fn test_tombstones_keep_indices() {
        let set = ColumnFamilySet::new(vec![handle(0, "0"), handle(1, "1"), handle(2, "default")]);
        assert_eq!(set.default_index(), 2);

        let dropped = set.tombstone(0).unwrap();
        assert_eq!(dropped.name(), "0");
        assert!(set.get(0).is_none());
        assert!(set.tombstone(0).is_none());
        assert_eq!(set.get(1).unwrap().name(), "1");
        assert_eq!(set.len(), 3);
        assert_eq!(set.default_index(), 2);
        assert_eq!(set.live().len(), 2);

        assert!(set.get(17).is_none());
        assert!(set.require(0).unwrap_err().is_invalid_argument());
    }
}
