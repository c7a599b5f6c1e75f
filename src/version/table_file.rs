use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, warn};

use crate::{
    table::{BlockCache, TableBuilder, TableReader, table_file_name},
    util::Result,
    version::manifest::FileRecord,
};

/// A live table file shared by every `Version` that lists it.
///
/// Once a flush or compaction replaces it the file is marked obsolete and
/// removed from disk when the last reader lets go.
pub struct TableFile {
    reader: TableReader,
    cache: Option<Arc<BlockCache>>,
    obsolete: AtomicBool,
}

impl TableFile {
    pub fn open(
        dir: &Path,
        number: u64,
        global_seqno: Option<u64>,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let path = dir.join(table_file_name(number));
        let reader = TableReader::open(path, number, global_seqno, cache.clone())?;
        Ok(TableFile {
            reader,
            cache,
            obsolete: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn reader(&self) -> &TableReader {
        &self.reader
    }

    pub fn number(&self) -> u64 {
        self.reader.file_number()
    }

    pub fn smallest(&self) -> &[u8] {
        &self.reader.properties().smallest_key
    }

    pub fn largest(&self) -> &[u8] {
        &self.reader.properties().largest_key
    }

    /// Whether `[start, end]` (open ended when `None`) touches this file
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        start.is_none_or(|s| s <= self.largest()) && end.is_none_or(|e| self.smallest() <= e)
    }

    /// Cheap pre-check for point lookups: key range then whole-key filter
    pub fn may_contain_key(&self, key: &[u8]) -> bool {
        self.smallest() <= key && key <= self.largest() && self.reader.key_may_match(key)
    }

    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn record(&self) -> FileRecord {
        let props = self.reader.properties();
        FileRecord {
            number: self.number(),
            size: self.reader.file_size(),
            smallest: props.smallest_key.clone(),
            largest: props.largest_key.clone(),
            smallest_seq: props.smallest_seq,
            largest_seq: props.largest_seq,
            global_seqno: self.reader.global_seqno(),
            has_blob: props.has_blob_file,
        }
    }
}

impl Drop for TableFile {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        let number = self.number();
        if let Some(cache) = &self.cache {
            cache.retain(|(file, _)| *file != number);
        }
        let path = self.reader.path().to_path_buf();
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to delete obsolete table");
        }
        if self.reader.properties().has_blob_file {
            let _ = fs::remove_file(TableBuilder::blob_path(&path));
        }
        debug!(file = number, "obsolete table deleted");
    }
}
