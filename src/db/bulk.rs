//! Bulk data movement: external table ingestion, range deletion and range
//! compaction.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    db::{Database, WriteOptimizations, WriteOptions},
    import_export::{IngestExternalFileOptions, SstFileWriter},
    transaction::WriteBatch,
    util::Result,
};

impl Database {
    /// Writer for an external table built with family `cf`'s options
    pub fn sst_writer(&self, cf: usize, path: impl AsRef<Path>) -> Result<SstFileWriter> {
        let options = self.column_family_options(cf)?;
        SstFileWriter::create(path, &options)
    }

    /// Copy the table at `path` into the default family. The file is not
    /// logged and shadows older data for the keys it contains.
    pub fn ingest_sst(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ingest_external_files(
            self.default_index(),
            &[path.as_ref().to_path_buf()],
            &IngestExternalFileOptions::default(),
        )
    }

    /// Link external tables into family `cf`, each with its own fresh
    /// sequence number, so later files in `paths` win over earlier ones.
    /// All files are validated before any is linked.
    pub fn ingest_external_files(
        &self,
        cf: usize,
        paths: &[PathBuf],
        options: &IngestExternalFileOptions,
    ) -> Result<()> {
        let handle = self.core().handle(cf)?;
        self.core().ingest(&handle, paths, options)
    }

    /// Delete `[start, end)` in one atomic batch.
    ///
    /// Takes no key locks: a transaction holding a lock inside the range
    /// does not block it and is not told about it.
    pub fn delete_range(&self, cf: usize, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_range(self.batch_index(cf)?, start, end);
        self.write_batch(batch, &WriteOptions::default(), WriteOptimizations {
            skip_concurrency_control: true,
            skip_duplicate_key_check: true,
        })
    }

    /// Flush, then rewrite every table overlapping `[start, end]` (either
    /// side open when `None`), dropping versions and tombstones no live
    /// snapshot can see. Reads return the same results before and after.
    pub fn compact_range(&self, cf: usize, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let handle = self.core().handle(cf)?;
        self.core().compact_range(&handle, start, end)?;
        debug!(cf = handle.name(), "range compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir) -> Database {
        Database::builder(dir.path().join("db"))
            .column_families(1)
            .open()
            .unwrap()
    }

    #[test]
    fn test_ingest_shadows_older_data() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.put(1, "a", "old").unwrap();
        db.put(1, "z", "kept").unwrap();

        let path = dir.path().join("load.sst");
        let mut writer = db.sst_writer(1, &path).unwrap();
        writer.put("a", "new").unwrap();
        writer.put("b", "fresh").unwrap();
        writer.finish().unwrap();

        db.ingest_sst(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.get(1, "a").unwrap(), Some(Bytes::from("new")));
        assert_eq!(db.get(1, "b").unwrap(), Some(Bytes::from("fresh")));
        assert_eq!(db.get(1, "z").unwrap(), Some(Bytes::from("kept")));

        db.put(1, "a", "newest").unwrap();
        assert_eq!(db.get(1, "a").unwrap(), Some(Bytes::from("newest")));
    }

    #[test]
    fn test_ingest_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let path = dir.path().join("garbage.sst");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();
        assert!(db.ingest_sst(&path).unwrap_err().is_corruption());
        assert!(db.ingest_sst(dir.path().join("missing.sst")).is_err());
    }

    #[test]
    fn test_move_files() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let path = dir.path().join("move.sst");
        let mut writer = db.sst_writer(0, &path).unwrap();
        writer.put("k", "v").unwrap();
        writer.finish().unwrap();

        db.ingest_external_files(0, &[path.clone()], &IngestExternalFileOptions {
            move_files: true,
            ..Default::default()
        })
        .unwrap();
        assert!(!path.exists());
        assert_eq!(db.get(0, "k").unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn test_delete_range_and_compact() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        for key in ["a", "b", "c", "d", "e"] {
            db.put(0, key, key).unwrap();
        }
        db.delete_range(0, "b", "d").unwrap();
        assert_eq!(db.get(0, "a").unwrap(), Some(Bytes::from("a")));
        assert_eq!(db.get(0, "b").unwrap(), None);
        assert_eq!(db.get(0, "c").unwrap(), None);
        assert_eq!(db.get(0, "d").unwrap(), Some(Bytes::from("d")));

        db.compact_range(0, None, None).unwrap();
        assert_eq!(db.get(0, "b").unwrap(), None);
        assert_eq!(db.get(0, "e").unwrap(), Some(Bytes::from("e")));
        assert!(db.delete_range(0, "d", "b").unwrap_err().is_invalid_argument());
    }
}
