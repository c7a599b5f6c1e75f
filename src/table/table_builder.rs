use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    column_family::ColumnFamilyOptions,
    compression::CompressionType,
    filter::{BloomFilterPolicy, FilterPolicy},
    memtable::{InternalKey, RangeTombstone, ValueKind},
    table::{
        blob::BlobWriter,
        block_builder::{BlockBuilder, seal_block},
        format::{BLOCK_TRAILER_SIZE, BlockHandle, Footer},
        properties::TableProperties,
    },
    util::{Result, Status},
};

/// Writes a sorted table file from entries added in internal-key order
pub struct TableBuilder {
    path: PathBuf,
    file: BufWriter<File>,
    offset: u64,
    options: ColumnFamilyOptions,
    compression: CompressionType,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Option<InternalKey>,
    filter_keys: Vec<Vec<u8>>,
    last_prefix: Option<Vec<u8>>,
    range_tombstones: Vec<RangeTombstone>,
    blob: Option<BlobWriter>,
    props: TableProperties,
}

impl TableBuilder {
    pub fn new<P: AsRef<Path>>(
        path: P,
        options: &ColumnFamilyOptions,
        compression: CompressionType,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| Status::io_error(format!("Failed to create table file: {e}")))?;

        Ok(TableBuilder {
            path,
            file: BufWriter::new(file),
            offset: 0,
            options: options.clone(),
            compression,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            last_key: None,
            filter_keys: Vec::new(),
            last_prefix: None,
            range_tombstones: Vec::new(),
            blob: None,
            props: TableProperties::default(),
        })
    }

    /// Path of the blob sidecar belonging to the table at `table_path`
    pub fn blob_path(table_path: &Path) -> PathBuf {
        table_path.with_extension("blob")
    }

    /// Add an entry; keys must be strictly increasing in internal order
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key
            && key <= last
        {
            return Err(Status::invalid_argument("Keys must be added in sorted order"));
        }
        if key.kind() == ValueKind::BlobIndex {
            return Err(Status::invalid_argument(
                "Blob references cannot be copied between tables",
            ));
        }

        let new_user_key = self
            .last_key
            .as_ref()
            .is_none_or(|last| last.user_key() != key.user_key());
        if new_user_key {
            self.collect_filter_keys(key.user_key());
        }

        let stored_key;
        let stored_value;
        let (key, value) = if key.kind() == ValueKind::Value && self.separates_blob(value) {
            if self.blob.is_none() {
                self.blob = Some(BlobWriter::create(Self::blob_path(&self.path))?);
            }
            let index = match self.blob.as_mut() {
                Some(writer) => writer.add(value)?,
                None => return Err(Status::io_error("Blob file unavailable")),
            };
            stored_value = index.encode();
            stored_key = InternalKey::new(
                key.user_key_bytes().clone(),
                key.sequence(),
                ValueKind::BlobIndex,
            );
            (&stored_key, stored_value.as_slice())
        } else {
            (key, value)
        };

        self.props.extend_key_range(key.user_key(), key.user_key());
        self.props.record_sequence(key.sequence());
        self.props.num_entries += 1;
        if key.kind() == ValueKind::Deletion {
            self.props.num_deletions += 1;
        }

        self.data_block.add(key, value);
        self.last_key = Some(key.clone());

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    pub fn add_range_tombstone(&mut self, tombstone: RangeTombstone) -> Result<()> {
        if tombstone.start >= tombstone.end {
            return Err(Status::invalid_argument("Empty range deletion"));
        }
        self.props
            .extend_key_range(&tombstone.start, &tombstone.end);
        self.props.record_sequence(tombstone.sequence);
        self.props.num_range_deletions += 1;
        self.range_tombstones.push(tombstone);
        Ok(())
    }

    fn separates_blob(&self, value: &[u8]) -> bool {
        self.options.enable_blob_files && !value.is_empty() && value.len() >= self.options.min_blob_size
    }

    fn collect_filter_keys(&mut self, user_key: &[u8]) {
        if !self.options.has_filter() {
            return;
        }
        if self.options.whole_key_filtering {
            self.filter_keys.push(user_key.to_vec());
        }
        if let Some(extractor) = &self.options.prefix_extractor
            && let Some(prefix) = extractor.transform(user_key)
            && self.last_prefix.as_deref() != Some(prefix)
        {
            self.filter_keys.push(prefix.to_vec());
            self.last_prefix = Some(prefix.to_vec());
        }
    }

    fn write_block(&mut self, sealed: &[u8]) -> Result<BlockHandle> {
        self.file
            .write_all(sealed)
            .map_err(|e| Status::io_error(format!("Failed to write block: {e}")))?;
        let handle = BlockHandle::new(self.offset, (sealed.len() - BLOCK_TRAILER_SIZE) as u64);
        self.offset += sealed.len() as u64;
        Ok(handle)
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let sealed = self.data_block.finish(self.compression);
        let handle = self.write_block(&sealed)?;
        self.props.data_size += sealed.len() as u64;

        let mut encoded = Vec::with_capacity(16);
        handle.encode_to(&mut encoded);
        if let Some(last) = &self.last_key {
            self.index_block.add(last, &encoded);
        }
        Ok(())
    }

    /// Write the meta blocks and footer and sync the file
    pub fn finish(mut self) -> Result<TableProperties> {
        if self.props.is_empty() {
            self.abandon();
            return Err(Status::invalid_argument("Cannot finish an empty table"));
        }
        self.flush_data_block()?;

        let filter_handle = if self.filter_keys.is_empty() {
            BlockHandle::default()
        } else {
            let bits = self.options.bloom_filter_bits_per_key.unwrap_or(10);
            let refs: Vec<&[u8]> = self.filter_keys.iter().map(|k| k.as_slice()).collect();
            let filter = BloomFilterPolicy::new(bits).create_filter(&refs);
            self.props.whole_key_filter = self.options.whole_key_filtering;
            self.props.prefix_filter = self.options.prefix_extractor.map(|p| p.name());
            self.write_block(&seal_block(&filter, CompressionType::None))?
        };

        let mut range_del = Vec::new();
        for tombstone in &self.range_tombstones {
            tombstone.encode_to(&mut range_del);
        }
        let range_del_handle = self.write_block(&seal_block(&range_del, CompressionType::None))?;

        if let Some(blob) = self.blob.take() {
            let blob_entries = blob.count();
            blob.finish()?;
            self.props.has_blob_file = blob_entries > 0;
        }
        self.props.compression = self.compression;

        let index_payload = self.index_block.finish(CompressionType::None);
        let props_json = serde_json::to_vec(&self.props)?;
        let properties_handle = self.write_block(&seal_block(&props_json, CompressionType::None))?;
        let index_handle = self.write_block(&index_payload)?;

        let footer = Footer {
            filter_handle,
            range_del_handle,
            properties_handle,
            index_handle,
        };
        let footer = footer.encode();
        self.file
            .write_all(&footer)
            .map_err(|e| Status::io_error(format!("Failed to write footer: {e}")))?;
        self.offset += footer.len() as u64;

        self.file
            .flush()
            .map_err(|e| Status::io_error(format!("Failed to flush table: {e}")))?;
        self.file
            .get_ref()
            .sync_all()
            .map_err(|e| Status::io_error(format!("Failed to sync table: {e}")))?;

        self.props.file_size = self.offset;
        debug!(
            path = %self.path.display(),
            entries = self.props.num_entries,
            range_deletions = self.props.num_range_deletions,
            bytes = self.offset,
            "table written"
        );
        Ok(self.props)
    }

    /// Remove the partially written files
    pub fn abandon(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = fs::remove_file(Self::blob_path(&self.path));
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
