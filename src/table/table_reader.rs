use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    cache::LRUCache,
    column_family::PrefixExtractor,
    filter::{BloomFilterPolicy, FilterPolicy},
    memtable::{InternalKey, LookupEntry, MAX_SEQUENCE, RangeTombstone, ValueKind},
    table::{
        blob::{BlobIndex, BlobReader},
        block::{Block, unseal_block},
        format::{BlockHandle, FOOTER_SIZE, Footer},
        properties::TableProperties,
        table_builder::TableBuilder,
    },
    util::{Result, Status, coding::Decoder},
};

/// Decoded data blocks shared by every table of a database, keyed by
/// `(file number, block offset)`
pub type BlockCache = LRUCache<(u64, u64), Arc<Block>>;

/// Per-read knobs forwarded from `ReadOptions`
#[derive(Debug, Clone, Copy)]
pub struct BlockReadSettings {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

impl Default for BlockReadSettings {
    fn default() -> Self {
        BlockReadSettings {
            verify_checksums: true,
            fill_cache: true,
        }
    }
}

/// Open handle on one immutable table file.
///
/// The index, filter, range tombstones and properties are loaded on open;
/// data blocks are read on demand through the shared block cache.
pub struct TableReader {
    path: PathBuf,
    file: Mutex<File>,
    file_number: u64,
    file_size: u64,
    global_seqno: Option<u64>,
    index: Block,
    filter: Option<Bytes>,
    range_tombstones: Vec<RangeTombstone>,
    properties: TableProperties,
    blob: Option<BlobReader>,
    cache: Option<Arc<BlockCache>>,
}

impl TableReader {
    pub fn open<P: AsRef<Path>>(
        path: P,
        file_number: u64,
        global_seqno: Option<u64>,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .map_err(|e| Status::io_error(format!("Failed to open table file: {e}")))?;

        let file_size = file.seek(SeekFrom::End(0))?;
        if file_size < FOOTER_SIZE as u64 {
            return Err(Status::corruption(format!(
                "File too small to be a table: {}",
                path.display()
            )));
        }

        let mut raw_footer = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut raw_footer)?;
        let footer = Footer::decode(&raw_footer)
            .ok_or_else(|| Status::corruption(format!("Bad table magic: {}", path.display())))?;

        let index = Block::decode(
            Self::read_payload(&mut file, &footer.index_handle, true)?,
            global_seqno,
        )?;

        let properties_raw = Self::read_payload(&mut file, &footer.properties_handle, true)?;
        let mut properties: TableProperties = serde_json::from_slice(&properties_raw)?;
        properties.file_size = file_size;

        let filter = if footer.filter_handle.size == 0 {
            None
        } else {
            Some(Self::read_payload(&mut file, &footer.filter_handle, true)?)
        };

        let range_del_raw = Self::read_payload(&mut file, &footer.range_del_handle, true)?;
        let mut range_tombstones = Vec::new();
        let mut decoder = Decoder::new(&range_del_raw);
        while !decoder.is_empty() {
            let mut tombstone = RangeTombstone::decode_from(&mut decoder)?;
            if let Some(seq) = global_seqno {
                tombstone.sequence = seq;
            }
            range_tombstones.push(tombstone);
        }

        let blob = if properties.has_blob_file {
            Some(BlobReader::open(TableBuilder::blob_path(&path))?)
        } else {
            None
        };

        Ok(TableReader {
            path,
            file: Mutex::new(file),
            file_number,
            file_size,
            global_seqno,
            index,
            filter,
            range_tombstones,
            properties,
            blob,
            cache,
        })
    }

    fn read_payload(file: &mut File, handle: &BlockHandle, verify: bool) -> Result<Bytes> {
        let mut raw = vec![0u8; handle.stored_len() as usize];
        file.seek(SeekFrom::Start(handle.offset))?;
        file.read_exact(&mut raw)
            .map_err(|e| Status::corruption(format!("Truncated block: {e}")))?;
        unseal_block(&raw, verify)
    }

    /// Load a data block, consulting and optionally filling the cache
    pub fn read_block(&self, handle: &BlockHandle, settings: BlockReadSettings) -> Result<Arc<Block>> {
        let cache_key = (self.file_number, handle.offset);
        if let Some(cache) = &self.cache
            && let Some(block) = cache.get(&cache_key)
        {
            return Ok(block);
        }

        let payload = {
            let mut file = self.file.lock();
            Self::read_payload(&mut file, handle, settings.verify_checksums)?
        };
        let block = Arc::new(Block::decode(payload, self.global_seqno)?);

        if settings.fill_cache
            && let Some(cache) = &self.cache
        {
            cache.insert(cache_key, Arc::clone(&block));
        }
        Ok(block)
    }

    pub fn num_data_blocks(&self) -> usize {
        self.index.len()
    }

    /// Handle of the i-th data block
    pub fn data_block_handle(&self, index: usize) -> Result<BlockHandle> {
        BlockHandle::decode(&self.index.entry(index).1)
            .ok_or_else(|| Status::corruption("Invalid block handle in index"))
    }

    /// First data block whose last key is >= `target`
    pub fn find_block(&self, target: &InternalKey) -> usize {
        self.index.seek(target)
    }

    /// Newest entry for `key` with sequence <= `read_sequence`
    pub fn get(
        &self,
        key: &[u8],
        read_sequence: u64,
        settings: BlockReadSettings,
    ) -> Result<Option<LookupEntry>> {
        if self.global_seqno.is_some_and(|seq| seq > read_sequence) || !self.key_may_match(key) {
            return Ok(None);
        }

        let target = InternalKey::for_seek(key, read_sequence);
        let block_index = self.find_block(&target);
        if block_index >= self.num_data_blocks() {
            return Ok(None);
        }
        let block = self.read_block(&self.data_block_handle(block_index)?, settings)?;
        let pos = block.seek(&target);
        if pos >= block.len() {
            return Ok(None);
        }

        let (found, value) = block.entry(pos);
        if found.user_key() != key {
            return Ok(None);
        }
        let value = match found.kind() {
            ValueKind::BlobIndex => self.resolve_blob(value, settings.verify_checksums)?,
            _ => value.clone(),
        };
        Ok(Some(LookupEntry {
            sequence: found.sequence(),
            kind: match found.kind() {
                ValueKind::BlobIndex => ValueKind::Value,
                kind => kind,
            },
            value,
        }))
    }

    /// Highest sequence that wrote `key` in this table
    pub fn latest_sequence(&self, key: &[u8]) -> Result<Option<u64>> {
        let point = self
            .get(key, MAX_SEQUENCE, BlockReadSettings::default())?
            .map(|entry| entry.sequence);
        let ranged = self
            .range_tombstones
            .iter()
            .filter(|t| t.covers(key))
            .map(|t| t.sequence)
            .max();
        Ok(point.max(ranged))
    }

    /// Read the value a blob reference points to
    pub fn resolve_blob(&self, reference: &[u8], verify_checksums: bool) -> Result<Bytes> {
        let blob = self
            .blob
            .as_ref()
            .ok_or_else(|| Status::corruption("Blob reference without blob file"))?;
        blob.read(&BlobIndex::decode(reference)?, verify_checksums)
    }

    /// False only when the whole-key filter rules `key` out
    pub fn key_may_match(&self, key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) if self.properties.whole_key_filter => {
                BloomFilterPolicy::new(0).may_contain(filter, key)
            },
            _ => true,
        }
    }

    /// False only when the prefix filter, built with the same extractor,
    /// rules `prefix` out
    pub fn prefix_may_match(&self, extractor: &PrefixExtractor, prefix: &[u8]) -> bool {
        match (&self.filter, &self.properties.prefix_filter) {
            (Some(filter), Some(name)) if *name == extractor.name() => {
                BloomFilterPolicy::new(0).may_contain(filter, prefix)
            },
            _ => true,
        }
    }

    /// Read and checksum every data block
    pub fn verify_checksums(&self) -> Result<()> {
        let settings = BlockReadSettings {
            verify_checksums: true,
            fill_cache: false,
        };
        for i in 0..self.num_data_blocks() {
            let block = self.read_block(&self.data_block_handle(i)?, settings)?;
            for (key, value) in block.entries() {
                if key.kind() == ValueKind::BlobIndex {
                    self.resolve_blob(value, true)?;
                }
            }
        }
        Ok(())
    }

    pub fn range_tombstones(&self) -> &[RangeTombstone] {
        &self.range_tombstones
    }

    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn global_seqno(&self) -> Option<u64> {
        self.global_seqno
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{column_family::ColumnFamilyOptions, compression::CompressionType};

    fn ik(key: &str, seq: u64, kind: ValueKind) -> InternalKey {
        InternalKey::new(Bytes::copy_from_slice(key.as_bytes()), seq, kind)
    }

    fn build(dir: &TempDir, options: &ColumnFamilyOptions, entries: &[(InternalKey, &[u8])]) -> PathBuf {
        let path = dir.path().join("000001.sst");
        let mut builder = TableBuilder::new(&path, options, CompressionType::Snappy).unwrap();
        for (key, value) in entries {
            builder.add(key, value).unwrap();
        }
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_point_lookup_by_sequence() {
        let dir = TempDir::new().unwrap();
        let options = ColumnFamilyOptions::default();
        let path = build(
            &dir,
            &options,
            &[
                (ik("a", 8, ValueKind::Value), b"a8"),
                (ik("a", 3, ValueKind::Value), b"a3"),
                (ik("b", 5, ValueKind::Deletion), b""),
                (ik("b", 2, ValueKind::Value), b"b2"),
            ],
        );
        let table = TableReader::open(&path, 1, None, None).unwrap();
        let settings = BlockReadSettings::default();

        assert_eq!(table.get(b"a", 10, settings).unwrap().unwrap().value.as_ref(), b"a8");
        assert_eq!(table.get(b"a", 5, settings).unwrap().unwrap().value.as_ref(), b"a3");
        assert!(table.get(b"a", 2, settings).unwrap().is_none());
        assert_eq!(table.get(b"b", 9, settings).unwrap().unwrap().kind, ValueKind::Deletion);
        assert!(table.get(b"c", 9, settings).unwrap().is_none());
        assert_eq!(table.latest_sequence(b"b").unwrap(), Some(5));
    }

    #[test]
    fn test_many_blocks_with_cache() {
        let dir = TempDir::new().unwrap();
        let options = ColumnFamilyOptions {
            block_size: 256,
            bloom_filter_bits_per_key: Some(10),
            ..Default::default()
        };
        let owned: Vec<(InternalKey, Vec<u8>)> = (0..500)
            .map(|i| (ik(&format!("key{i:04}"), i + 1, ValueKind::Value), format!("value{i}").into_bytes()))
            .collect();
        let entries: Vec<(InternalKey, &[u8])> =
            owned.iter().map(|(k, v)| (k.clone(), v.as_slice())).collect();
        let path = build(&dir, &options, &entries);

        let cache = Arc::new(BlockCache::new(16));
        let table = TableReader::open(&path, 1, None, Some(Arc::clone(&cache))).unwrap();
        assert!(table.num_data_blocks() > 10);
        assert_eq!(table.properties().num_entries, 500);
        assert_eq!(table.properties().smallest_key, b"key0000");
        assert_eq!(table.properties().largest_key, b"key0499");

        for i in (0..500).step_by(37) {
            let got = table.get(format!("key{i:04}").as_bytes(), u64::MAX, BlockReadSettings::default());
            assert_eq!(got.unwrap().unwrap().value, Bytes::from(format!("value{i}")));
        }
        assert!(!cache.is_empty());
        assert!(!table.key_may_match(b"definitely-not-present-0"));
        table.verify_checksums().unwrap();
    }

    #[test]
    fn test_blob_values_and_range_tombstones() {
        let dir = TempDir::new().unwrap();
        let options = ColumnFamilyOptions {
            enable_blob_files: true,
            min_blob_size: 64,
            ..Default::default()
        };
        let big = vec![b'z'; 4096];
        let path = dir.path().join("000002.sst");
        let mut builder = TableBuilder::new(&path, &options, CompressionType::Lz4).unwrap();
        builder.add(&ik("big", 4, ValueKind::Value), &big).unwrap();
        builder.add(&ik("small", 5, ValueKind::Value), b"tiny").unwrap();
        builder
            .add_range_tombstone(RangeTombstone::new(
                Bytes::from_static(b"m"),
                Bytes::from_static(b"p"),
                6,
            ))
            .unwrap();
        let props = builder.finish().unwrap();
        assert!(props.has_blob_file);
        assert_eq!(props.largest_key, b"small");

        let table = TableReader::open(&path, 2, Some(40), None).unwrap();
        let got = table.get(b"big", 50, BlockReadSettings::default()).unwrap().unwrap();
        assert_eq!(got.value.as_ref(), big.as_slice());
        assert_eq!(got.sequence, 40);
        assert!(table.get(b"big", 39, BlockReadSettings::default()).unwrap().is_none());
        assert_eq!(table.range_tombstones()[0].sequence, 40);
    }

    #[test]
    fn test_truncated_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000003.sst");
        std::fs::write(&path, b"short").unwrap();
        assert!(TableReader::open(&path, 3, None, None).err().unwrap().is_corruption());
    }
}
