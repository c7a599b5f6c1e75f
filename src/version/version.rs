use std::sync::Arc;

use bytes::Bytes;

use crate::{
    memtable::{LookupEntry, MemTable, RangeDelAggregator, RangeTombstone, ValueKind},
    table::BlockReadSettings,
    util::Result,
    version::TableFile,
};

/// Immutable read view of one column family: the active memtable plus the
/// table files flushed, compacted or ingested so far.
///
/// Writers never modify a `Version`; flush, compaction and ingestion
/// install a new one. Readers clone the `Arc` and keep every file they
/// reference alive until they are done.
pub struct Version {
    pub mem: Arc<MemTable>,
    pub files: Vec<Arc<TableFile>>,
}

impl Version {
    pub fn new(mem: Arc<MemTable>, files: Vec<Arc<TableFile>>) -> Self {
        Version { mem, files }
    }

    pub fn empty() -> Self {
        Version::new(Arc::new(MemTable::new()), Vec::new())
    }

    /// Same files, different memtable
    pub fn with_mem(&self, mem: Arc<MemTable>) -> Self {
        Version::new(mem, self.files.clone())
    }

    /// Same memtable, different files
    pub fn with_files(&self, files: Vec<Arc<TableFile>>) -> Self {
        Version::new(Arc::clone(&self.mem), files)
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Range tombstones of every source visible at `read_sequence`
    pub fn range_deletions(&self, read_sequence: u64) -> RangeDelAggregator {
        let mut tombstones: Vec<RangeTombstone> = self.mem.range_tombstones();
        for file in &self.files {
            tombstones.extend_from_slice(file.reader().range_tombstones());
        }
        RangeDelAggregator::new(tombstones, read_sequence)
    }

    /// Value of `key` as of `read_sequence`.
    ///
    /// Every source is consulted and the newest visible entry wins; it is
    /// then hidden if a newer range tombstone covers it.
    pub fn get(
        &self,
        key: &[u8],
        read_sequence: u64,
        settings: BlockReadSettings,
    ) -> Result<Option<Bytes>> {
        let mut newest: Option<LookupEntry> = self.mem.get(key, read_sequence);
        for file in &self.files {
            if !file.may_contain_key(key) {
                continue;
            }
            if let Some(found) = file.reader().get(key, read_sequence, settings)?
                && newest.as_ref().is_none_or(|n| found.sequence > n.sequence)
            {
                newest = Some(found);
            }
        }

        let Some(entry) = newest else {
            return Ok(None);
        };
        if entry.kind == ValueKind::Deletion {
            return Ok(None);
        }
        if self.range_deletions(read_sequence).should_delete(key, entry.sequence) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// Highest sequence that wrote or deleted `key`, in any source
    pub fn latest_sequence(&self, key: &[u8]) -> Result<Option<u64>> {
        let mut latest = self.mem.latest_sequence(key);
        for file in &self.files {
            if !file.may_contain_key(key) && file.reader().range_tombstones().is_empty() {
                continue;
            }
            latest = latest.max(file.reader().latest_sequence(key)?);
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memtable_only_reads() {
        let mem = Arc::new(MemTable::new());
        mem.add(1, ValueKind::Value, b"a", b"1");
        mem.add(2, ValueKind::Value, b"b", b"2");
        mem.add(3, ValueKind::Deletion, b"a", b"");
        mem.delete_range(4, b"b", b"c");
        let version = Version::new(mem, Vec::new());
        let settings = BlockReadSettings::default();

        assert_eq!(version.get(b"a", 2, settings).unwrap().unwrap().as_ref(), b"1");
        assert!(version.get(b"a", 3, settings).unwrap().is_none());
        assert_eq!(version.get(b"b", 3, settings).unwrap().unwrap().as_ref(), b"2");
        assert!(version.get(b"b", 4, settings).unwrap().is_none());
        assert_eq!(version.latest_sequence(b"b").unwrap(), Some(4));
        assert_eq!(version.latest_sequence(b"z").unwrap(), None);
    }
}
