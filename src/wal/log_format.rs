//! Write-ahead log framing.
//!
//! The log is a sequence of 32 KiB blocks. A logical record (one encoded
//! write batch) is split into fragments that never straddle a block
//! boundary; each fragment carries its own header:
//!
//! ```text
//! +-----------+-----------+--------+----------------+
//! | crc32 (4) | length (2)| type(1)| payload        |
//! +-----------+-----------+--------+----------------+
//! ```
//!
//! The checksum covers the type byte and the payload. A block tail shorter
//! than a header is zero-filled and skipped by the reader.

use crc32fast::Hasher;

pub const BLOCK_SIZE: usize = 32 * 1024;

pub const HEADER_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Record fits in one fragment
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Fragment type for a slice of a record
    pub fn for_fragment(is_first: bool, is_last: bool) -> Self {
        match (is_first, is_last) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub length: u16,
    pub record_type: RecordType,
}

impl RecordHeader {
    pub fn for_payload(record_type: RecordType, payload: &[u8]) -> Self {
        RecordHeader {
            checksum: checksum(record_type, payload),
            length: payload.len() as u16,
            record_type,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        header[4..6].copy_from_slice(&self.length.to_le_bytes());
        header[6] = self.record_type as u8;
        header
    }

    /// None for an unknown type byte (including zero padding)
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Option<Self> {
        Some(RecordHeader {
            checksum: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            length: u16::from_le_bytes([raw[4], raw[5]]),
            record_type: RecordType::from_u8(raw[6])?,
        })
    }

    pub fn matches(&self, payload: &[u8]) -> bool {
        self.checksum == checksum(self.record_type, payload)
    }
}

pub fn checksum(record_type: RecordType, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type as u8]);
    hasher.update(payload);
    hasher.finalize()
}

/// Log files are named by their file number: `000012.log`
pub fn log_file_name(number: u64) -> String {
    format!("{number:06}.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_types() {
        assert_eq!(RecordType::for_fragment(true, true), RecordType::Full);
        assert_eq!(RecordType::for_fragment(true, false), RecordType::First);
        assert_eq!(RecordType::for_fragment(false, false), RecordType::Middle);
        assert_eq!(RecordType::for_fragment(false, true), RecordType::Last);
        assert_eq!(RecordType::from_u8(0), None);
    }

    #[test]
    fn test_header_checksum_binds_type() {
        let header = RecordHeader::for_payload(RecordType::Full, b"batch");
        let decoded = RecordHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.matches(b"batch"));
        assert!(!decoded.matches(b"batcH"));
        assert_ne!(
            checksum(RecordType::First, b"batch"),
            checksum(RecordType::Full, b"batch")
        );
    }

    #[test]
    fn test_zero_padding_is_not_a_header() {
        assert!(RecordHeader::decode(&[0u8; HEADER_SIZE]).is_none());
    }
}
