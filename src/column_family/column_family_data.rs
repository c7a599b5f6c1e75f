use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;

use crate::{
    column_family::ColumnFamilyOptions,
    version::{FamilyRecord, Version},
};

/// Runtime state of one column family.
///
/// The current `Version` is swapped whole under the write lock by flush,
/// compaction and ingestion; readers clone the `Arc` and drop the lock.
pub struct ColumnFamilyData {
    /// Unique across the lifetime of the database, never reused
    id: u32,
    name: String,
    options: ColumnFamilyOptions,
    current: RwLock<Arc<Version>>,
    dropped: AtomicBool,
}

impl ColumnFamilyData {
    pub fn new(id: u32, name: String, options: ColumnFamilyOptions, version: Version) -> Self {
        ColumnFamilyData {
            id,
            name,
            options,
            current: RwLock::new(Arc::new(version)),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ColumnFamilyOptions {
        &self.options
    }

    #[inline]
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Swap the version under the write lock using `f`
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Version) -> Version,
    {
        let mut current = self.current.write();
        let next = f(&current);
        *current = Arc::new(next);
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Mark dropped; every table file is deleted once unreferenced
    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
        for file in &self.current().files {
            file.mark_obsolete();
        }
    }

    pub fn record(&self) -> FamilyRecord {
        FamilyRecord {
            id: self.id,
            name: self.name.clone(),
            options: self.options.clone(),
            files: self.current().files.iter().map(|f| f.record()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::ValueKind;

    #[test]
    fn test_update_swaps_version() {
        let cf = ColumnFamilyData::new(3, "0".to_string(), ColumnFamilyOptions::default(), Version::empty());
        let before = cf.current();
        before.mem.add(1, ValueKind::Value, b"k", b"v");

        cf.update(|v| v.with_mem(Arc::new(crate::memtable::MemTable::new())));
        assert!(cf.current().mem.is_empty());
        assert_eq!(before.mem.len(), 1);

        assert!(!cf.is_dropped());
        cf.mark_dropped();
        assert!(cf.is_dropped());
        assert_eq!(cf.record().name, "0");
    }
}
