use std::path::PathBuf;

use bytes::Bytes;

use crate::{
    column_family::{ColumnFamilyOptions, PrefixExtractor},
    compression::CompressionType,
    table::{BlockReadSettings, DEFAULT_BLOCK_SIZE},
};

/// Open-time configuration of a database.
///
/// Every tuning flag has an explicit default here; nothing is read from
/// global state. The flags below `destroy_on_exit` shape the
/// `ColumnFamilyOptions` template used for the default family and for every
/// numbered family synthesized by schema resolution.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub path: PathBuf,
    /// Load column family descriptors from this OPTIONS file
    pub options_path: Option<PathBuf>,
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub create_missing_column_families: bool,
    /// Fail on a damaged WAL tail and verify table blocks on open
    pub paranoid_checks: bool,
    /// Disable automatic compaction and buffer more in memory
    pub prepare_for_bulk_load: bool,
    /// Background threads for compaction; None uses rayon's default
    pub increase_parallelism: Option<usize>,
    pub optimize_level_style_compaction: bool,
    /// Number of numbered column families ("0".."N-1") besides "default"
    pub column_families: usize,
    /// Delete the directory when the last handle is dropped
    pub destroy_on_exit: bool,

    pub compression: CompressionType,
    pub bottommost_compression: CompressionType,
    pub block_size: usize,
    pub write_buffer_size: usize,
    pub use_bloom_filter: bool,
    pub bloom_filter_bits_per_key: usize,
    pub bloom_filter_whole_key_filtering: bool,
    pub prefix_extractor: Option<PrefixExtractor>,
    pub enable_blob_files: bool,
    pub min_blob_size: usize,
    /// Number of blocks kept by the shared block cache
    pub block_cache_capacity: usize,
    pub level0_file_num_compaction_trigger: usize,
    pub disable_auto_compactions: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            path: PathBuf::new(),
            options_path: None,
            create_if_missing: true,
            error_if_exists: false,
            create_missing_column_families: true,
            paranoid_checks: false,
            prepare_for_bulk_load: false,
            increase_parallelism: None,
            optimize_level_style_compaction: false,
            column_families: 0,
            destroy_on_exit: false,
            compression: CompressionType::Lz4,
            bottommost_compression: CompressionType::Lz4,
            block_size: DEFAULT_BLOCK_SIZE,
            write_buffer_size: 64 * 1024 * 1024,
            use_bloom_filter: false,
            bloom_filter_bits_per_key: 10,
            bloom_filter_whole_key_filtering: true,
            prefix_extractor: None,
            enable_blob_files: false,
            min_blob_size: 0,
            block_cache_capacity: 4096,
            level0_file_num_compaction_trigger: 4,
            disable_auto_compactions: false,
        }
    }
}

impl DbOptions {
    /// Template options for "default" and synthesized families
    pub fn column_family_options(&self) -> ColumnFamilyOptions {
        let mut options = ColumnFamilyOptions {
            write_buffer_size: self.write_buffer_size,
            compression: self.compression,
            bottommost_compression: self.bottommost_compression,
            block_size: self.block_size,
            bloom_filter_bits_per_key: self.use_bloom_filter.then_some(self.bloom_filter_bits_per_key),
            whole_key_filtering: self.bloom_filter_whole_key_filtering,
            prefix_extractor: self.prefix_extractor,
            enable_blob_files: self.enable_blob_files,
            min_blob_size: self.min_blob_size,
            level0_file_num_compaction_trigger: self.level0_file_num_compaction_trigger,
            disable_auto_compactions: self.disable_auto_compactions,
        };
        if self.optimize_level_style_compaction {
            options.write_buffer_size = options.write_buffer_size.max(128 * 1024 * 1024);
            options.level0_file_num_compaction_trigger = 2;
        }
        if self.prepare_for_bulk_load {
            options.write_buffer_size = options.write_buffer_size.max(256 * 1024 * 1024);
            options.disable_auto_compactions = true;
        }
        options
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging
    pub sync: bool,
    pub disable_wal: bool,
    /// Fail with `Incomplete` instead of flushing a full memtable inline
    pub no_slowdown: bool,
}

/// Knobs of `Database::write_batch`
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptimizations {
    /// Write without taking key locks
    pub skip_concurrency_control: bool,
    /// Trust that the batch holds each key at most once
    pub skip_duplicate_key_check: bool,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
    /// Iterators see writes made after they were created
    pub tailing: bool,
    pub total_order_seek: bool,
    pub auto_prefix_mode: bool,
    pub prefix_same_as_start: bool,
    pub pin_data: bool,
    /// Inclusive
    pub lower_bound: Option<Bytes>,
    /// Exclusive
    pub upper_bound: Option<Bytes>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: true,
            fill_cache: true,
            tailing: false,
            total_order_seek: false,
            auto_prefix_mode: true,
            prefix_same_as_start: false,
            pin_data: false,
            lower_bound: None,
            upper_bound: None,
        }
    }
}

impl ReadOptions {
    pub(crate) fn block_settings(&self) -> BlockReadSettings {
        BlockReadSettings {
            verify_checksums: self.verify_checksums,
            fill_cache: self.fill_cache,
        }
    }
}
