use serde::{Deserialize, Serialize};

use crate::compression::CompressionType;

/// Summary stored in every table's properties block (JSON)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_deletions: u64,
    pub num_range_deletions: u64,
    /// Smallest user key, counting range tombstone starts
    pub smallest_key: Vec<u8>,
    /// Largest user key, counting range tombstone ends
    pub largest_key: Vec<u8>,
    pub smallest_seq: u64,
    pub largest_seq: u64,
    pub compression: CompressionType,
    pub whole_key_filter: bool,
    /// Name of the prefix extractor whose prefixes are in the filter
    pub prefix_filter: Option<String>,
    pub has_blob_file: bool,
    pub data_size: u64,
    pub file_size: u64,
}

impl Default for TableProperties {
    fn default() -> Self {
        TableProperties {
            num_entries: 0,
            num_deletions: 0,
            num_range_deletions: 0,
            smallest_key: Vec::new(),
            largest_key: Vec::new(),
            smallest_seq: u64::MAX,
            largest_seq: 0,
            compression: CompressionType::None,
            whole_key_filter: false,
            prefix_filter: None,
            has_blob_file: false,
            data_size: 0,
            file_size: 0,
        }
    }
}

impl TableProperties {
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0 && self.num_range_deletions == 0
    }

    pub(crate) fn extend_key_range(&mut self, smallest: &[u8], largest: &[u8]) {
        if self.is_empty() || smallest < self.smallest_key.as_slice() {
            self.smallest_key = smallest.to_vec();
        }
        if self.is_empty() || largest > self.largest_key.as_slice() {
            self.largest_key = largest.to_vec();
        }
    }

    pub(crate) fn record_sequence(&mut self, sequence: u64) {
        self.smallest_seq = self.smallest_seq.min(sequence);
        self.largest_seq = self.largest_seq.max(sequence);
    }
}
