use std::sync::Arc;

use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    memtable::{EMPTY_INTERNAL_KEY, InternalKey, ValueKind},
    table::{Block, BlockReadSettings},
    util::Result,
    version::TableFile,
};

/// Two-level cursor over a table: the index picks a data block, the block
/// is binary searched.
pub struct TableIterator {
    file: Arc<TableFile>,
    settings: BlockReadSettings,
    block_index: usize,
    block: Option<Arc<Block>>,
    pos: usize,
}

impl TableIterator {
    pub fn new(file: Arc<TableFile>, settings: BlockReadSettings) -> Self {
        TableIterator {
            file,
            settings,
            block_index: 0,
            block: None,
            pos: 0,
        }
    }

    fn load_block(&mut self, index: usize) -> Result<bool> {
        self.block = None;
        let reader = self.file.reader();
        if index >= reader.num_data_blocks() {
            return Ok(false);
        }
        let handle = reader.data_block_handle(index)?;
        self.block = Some(reader.read_block(&handle, self.settings)?);
        self.block_index = index;
        Ok(true)
    }

    fn current(&self) -> Option<&(InternalKey, Bytes)> {
        self.block
            .as_ref()
            .filter(|block| self.pos < block.len())
            .map(|block| block.entry(self.pos))
    }

    fn invalidate<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.block = None;
        }
        result
    }

    /// Move forward over empty blocks until positioned or past the end
    fn skip_forward(&mut self) -> Result<bool> {
        loop {
            if self.current().is_some() {
                return Ok(true);
            }
            let next = if self.block.is_some() {
                self.block_index + 1
            } else {
                return Ok(false);
            };
            if !self.load_block(next)? {
                return Ok(false);
            }
            self.pos = 0;
        }
    }

    fn seek_inner(&mut self, target: &InternalKey) -> Result<bool> {
        let index = self.file.reader().find_block(target);
        if !self.load_block(index)? {
            return Ok(false);
        }
        self.pos = self.block.as_ref().map_or(0, |b| b.seek(target));
        self.skip_forward()
    }

    fn seek_for_prev_inner(&mut self, target: &InternalKey) -> Result<bool> {
        let reader = self.file.reader();
        let blocks = reader.num_data_blocks();
        if blocks == 0 {
            self.block = None;
            return Ok(false);
        }
        let mut index = reader.find_block(target).min(blocks - 1);
        loop {
            self.load_block(index)?;
            let found = self.block.as_ref().and_then(|b| b.seek_for_prev(target));
            if let Some(pos) = found {
                self.pos = pos;
                return Ok(true);
            }
            if index == 0 {
                self.block = None;
                return Ok(false);
            }
            index -= 1;
        }
    }

    fn seek_to_last_inner(&mut self) -> Result<bool> {
        let mut index = self.file.reader().num_data_blocks();
        while index > 0 {
            index -= 1;
            self.load_block(index)?;
            if let Some(len) = self.block.as_ref().map(|b| b.len())
                && len > 0
            {
                self.pos = len - 1;
                return Ok(true);
            }
        }
        self.block = None;
        Ok(false)
    }

    fn prev_inner(&mut self) -> Result<bool> {
        if self.pos > 0 {
            self.pos -= 1;
            return Ok(true);
        }
        while self.block_index > 0 {
            let index = self.block_index - 1;
            self.load_block(index)?;
            if let Some(len) = self.block.as_ref().map(|b| b.len())
                && len > 0
            {
                self.pos = len - 1;
                return Ok(true);
            }
        }
        self.block = None;
        Ok(false)
    }
}

impl InternalIterator for TableIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        let result = self.load_block(0).and_then(|loaded| {
            self.pos = 0;
            if loaded { self.skip_forward() } else { Ok(false) }
        });
        self.invalidate(result)
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        let result = self.seek_to_last_inner();
        self.invalidate(result)
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        let result = self.seek_inner(target);
        self.invalidate(result)
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        let result = self.seek_for_prev_inner(target);
        self.invalidate(result)
    }

    fn next(&mut self) -> Result<bool> {
        if self.current().is_none() {
            return Ok(false);
        }
        self.pos += 1;
        let result = self.skip_forward();
        self.invalidate(result)
    }

    fn prev(&mut self) -> Result<bool> {
        if self.current().is_none() {
            return Ok(false);
        }
        let result = self.prev_inner();
        self.invalidate(result)
    }

    fn valid(&self) -> bool {
        self.current().is_some()
    }

    fn key(&self) -> &InternalKey {
        self.current().map_or(&EMPTY_INTERNAL_KEY, |(key, _)| key)
    }

    fn value(&self) -> Result<Bytes> {
        match self.current() {
            Some((key, value)) if key.kind() == ValueKind::BlobIndex => self
                .file
                .reader()
                .resolve_blob(value, self.settings.verify_checksums),
            Some((_, value)) => Ok(value.clone()),
            None => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        column_family::ColumnFamilyOptions,
        compression::CompressionType,
        table::{TableBuilder, table_file_name},
    };

    fn build_table(dir: &TempDir, count: u64) -> Arc<TableFile> {
        let options = ColumnFamilyOptions {
            block_size: 128,
            enable_blob_files: true,
            min_blob_size: 200,
            ..Default::default()
        };
        let mut builder = TableBuilder::new(
            dir.path().join(table_file_name(7)),
            &options,
            CompressionType::None,
        )
        .unwrap();
        for i in 0..count {
            let key = InternalKey::new(Bytes::from(format!("k{i:03}")), i + 1, ValueKind::Value);
            let value = if i % 10 == 0 { vec![b'x'; 300] } else { format!("v{i}").into_bytes() };
            builder.add(&key, &value).unwrap();
        }
        builder.finish().unwrap();
        Arc::new(TableFile::open(dir.path(), 7, None, None).unwrap())
    }

    #[test]
    fn test_full_scan_both_directions() {
        let dir = TempDir::new().unwrap();
        let file = build_table(&dir, 100);
        let mut iter = TableIterator::new(file, BlockReadSettings::default());

        let mut forward = 0;
        let mut ok = iter.seek_to_first().unwrap();
        while ok {
            forward += 1;
            ok = iter.next().unwrap();
        }
        assert_eq!(forward, 100);

        let mut backward = Vec::new();
        let mut ok = iter.seek_to_last().unwrap();
        while ok {
            backward.push(iter.key().user_key().to_vec());
            ok = iter.prev().unwrap();
        }
        assert_eq!(backward.len(), 100);
        assert_eq!(backward[0], b"k099");
        assert_eq!(backward[99], b"k000");
    }

    #[test]
    fn test_seek_and_blob_values() {
        let dir = TempDir::new().unwrap();
        let file = build_table(&dir, 50);
        let mut iter = TableIterator::new(file, BlockReadSettings::default());

        assert!(iter.seek(&InternalKey::for_seek(b"k020", u64::MAX)).unwrap());
        assert_eq!(iter.key().user_key(), b"k020");
        assert_eq!(iter.value().unwrap().len(), 300);
        assert!(iter.next().unwrap());
        assert_eq!(iter.value().unwrap().as_ref(), b"v21");

        assert!(iter.seek_for_prev(&InternalKey::after_all_versions(b"k0305")).unwrap());
        assert_eq!(iter.key().user_key(), b"k030");

        assert!(!iter.seek(&InternalKey::for_seek(b"zzz", u64::MAX)).unwrap());
        assert!(!iter.seek_for_prev(&InternalKey::after_all_versions(b"a")).unwrap());
    }
}
