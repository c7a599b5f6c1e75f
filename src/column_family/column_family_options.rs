use serde::{Deserialize, Serialize};

use crate::{compression::CompressionType, table::format::DEFAULT_BLOCK_SIZE};

/// Maps a key to the prefix used by prefix bloom filters and
/// `prefix_same_as_start` iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefixExtractor {
    /// First `n` bytes; shorter keys are outside the prefix domain
    Fixed(usize),
    /// Up to the first `n` bytes; every key is in the domain
    Capped(usize),
}

impl PrefixExtractor {
    pub fn transform<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        match *self {
            PrefixExtractor::Fixed(n) => key.get(..n),
            PrefixExtractor::Capped(n) => Some(&key[..key.len().min(n)]),
        }
    }

    /// Prefix length of keys long enough to carry a full prefix
    pub fn length(&self) -> usize {
        match *self {
            PrefixExtractor::Fixed(n) | PrefixExtractor::Capped(n) => n,
        }
    }

    /// Stable identifier recorded in table properties
    pub fn name(&self) -> String {
        match self {
            PrefixExtractor::Fixed(n) => format!("fixed:{n}"),
            PrefixExtractor::Capped(n) => format!("capped:{n}"),
        }
    }
}

/// Tuning of one column family.
///
/// ```ignore
/// let options = ColumnFamilyOptions {
///     compression: CompressionType::Snappy,
///     bloom_filter_bits_per_key: Some(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnFamilyOptions {
    /// Memtable size that triggers a flush. Default: 64MB
    pub write_buffer_size: usize,

    /// Codec for freshly flushed tables. Default: Lz4
    pub compression: CompressionType,

    /// Codec for compaction outputs. Default: Lz4
    pub bottommost_compression: CompressionType,

    /// Target uncompressed data block size. Default: 16KB
    pub block_size: usize,

    /// Bloom filter bits per key; None disables filters
    pub bloom_filter_bits_per_key: Option<usize>,

    /// Put whole keys into the filter (in addition to prefixes)
    pub whole_key_filtering: bool,

    pub prefix_extractor: Option<PrefixExtractor>,

    /// Separate large values into blob sidecar files
    pub enable_blob_files: bool,

    /// Values of at least this many bytes go to blob files
    pub min_blob_size: usize,

    /// Table count that triggers an automatic compaction. Default: 4
    pub level0_file_num_compaction_trigger: usize,

    pub disable_auto_compactions: bool,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        ColumnFamilyOptions {
            write_buffer_size: 64 * 1024 * 1024,
            compression: CompressionType::Lz4,
            bottommost_compression: CompressionType::Lz4,
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_filter_bits_per_key: None,
            whole_key_filtering: true,
            prefix_extractor: None,
            enable_blob_files: false,
            min_blob_size: 0,
            level0_file_num_compaction_trigger: 4,
            disable_auto_compactions: false,
        }
    }
}

impl ColumnFamilyOptions {
    pub(crate) fn has_filter(&self) -> bool {
        self.bloom_filter_bits_per_key.is_some()
            && (self.whole_key_filtering || self.prefix_extractor.is_some())
    }
}
