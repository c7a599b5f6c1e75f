//! Building tables outside a database and linking them in.
//!
//! An `SstFileWriter` produces a table whose entries all carry sequence 0;
//! on ingestion the file is assigned one fresh global sequence number, so
//! it layers over everything written before it.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::{
    column_family::ColumnFamilyOptions,
    memtable::{InternalKey, RangeTombstone, ValueKind},
    table::{TableBuilder, TableProperties},
    util::{Result, Status},
};

#[derive(Debug, Clone)]
pub struct IngestExternalFileOptions {
    /// Rename the files into the database instead of copying them
    pub move_files: bool,
    /// Read every block of each file before linking it
    pub verify_checksums_before_ingest: bool,
}

impl Default for IngestExternalFileOptions {
    fn default() -> Self {
        IngestExternalFileOptions {
            move_files: false,
            verify_checksums_before_ingest: true,
        }
    }
}

/// Writes an external table with a column family's table options.
///
/// Point keys must be added in strictly ascending order. Range deletions
/// may be added in any order and only affect data older than the file.
pub struct SstFileWriter {
    path: PathBuf,
    builder: Option<TableBuilder>,
    last_key: Option<Bytes>,
}

impl SstFileWriter {
    pub fn create<P: AsRef<Path>>(path: P, options: &ColumnFamilyOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let builder = TableBuilder::new(&path, options, options.compression)?;
        Ok(SstFileWriter {
            path,
            builder: Some(builder),
            last_key: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn builder(&mut self) -> Result<&mut TableBuilder> {
        self.builder
            .as_mut()
            .ok_or_else(|| Status::invalid_argument("SstFileWriter already finished"))
    }

    fn add(&mut self, key: &[u8], kind: ValueKind, value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key
            && key <= last.as_ref()
        {
            return Err(Status::invalid_argument(format!(
                "Keys must be strictly ascending: {:?} after {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(last)
            )));
        }
        let key = Bytes::copy_from_slice(key);
        self.builder()?
            .add(&InternalKey::new(key.clone(), 0, kind), value)?;
        self.last_key = Some(key);
        Ok(())
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.add(key.as_ref(), ValueKind::Value, value.as_ref())
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.add(key.as_ref(), ValueKind::Deletion, &[])
    }

    /// Delete `[start, end)` from data older than this file
    pub fn delete_range(&mut self, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        let tombstone = RangeTombstone::new(
            Bytes::copy_from_slice(start.as_ref()),
            Bytes::copy_from_slice(end.as_ref()),
            0,
        );
        self.builder()?.add_range_tombstone(tombstone)
    }

    pub fn num_entries(&self) -> u64 {
        self.builder.as_ref().map_or(0, |b| b.num_entries())
    }

    /// Complete the file. A writer with nothing added fails with
    /// `InvalidArgument` and leaves no file behind.
    pub fn finish(&mut self) -> Result<TableProperties> {
        let builder = self
            .builder
            .take()
            .ok_or_else(|| Status::invalid_argument("SstFileWriter already finished"))?;
        builder.finish()
    }
}

impl Drop for SstFileWriter {
    fn drop(&mut self) {
        if let Some(mut builder) = self.builder.take() {
            builder.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::table::TableReader;

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bulk.sst");
        let mut writer = SstFileWriter::create(&path, &ColumnFamilyOptions::default()).unwrap();
        for i in 0..100 {
            writer
                .put(format!("key{i:03}"), format!("value{i}"))
                .unwrap();
        }
        writer.delete("key100").unwrap();
        writer.delete_range("a", "b").unwrap();
        assert_eq!(writer.num_entries(), 101);
        let props = writer.finish().unwrap();
        assert_eq!(props.num_entries, 101);
        assert_eq!(props.num_deletions, 1);
        assert_eq!(props.num_range_deletions, 1);

        let reader = TableReader::open(&path, 0, Some(7), None).unwrap();
        assert_eq!(reader.global_seqno(), Some(7));
        assert_eq!(reader.latest_sequence(b"key042").unwrap(), Some(7));
    }

    #[test]
    fn test_rejects_unordered_keys() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            SstFileWriter::create(dir.path().join("x.sst"), &ColumnFamilyOptions::default())
                .unwrap();
        writer.put("b", "1").unwrap();
        assert!(writer.put("a", "2").unwrap_err().is_invalid_argument());
        assert!(writer.put("b", "3").unwrap_err().is_invalid_argument());
        writer.put("c", "4").unwrap();
    }

    #[test]
    fn test_empty_and_finished() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.sst");
        let mut writer = SstFileWriter::create(&path, &ColumnFamilyOptions::default()).unwrap();
        assert!(writer.finish().unwrap_err().is_invalid_argument());
        assert!(!path.exists());
        assert!(writer.put("a", "1").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_dropped_writer_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abandoned.sst");
        {
            let mut writer =
                SstFileWriter::create(&path, &ColumnFamilyOptions::default()).unwrap();
            writer.put("a", "1").unwrap();
        }
        assert!(!path.exists());
    }
}
