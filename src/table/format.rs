/// Sorted table file format
///
/// ```text
/// +----------------------+
/// | data block 0         |   entries: internal key | value
/// | ...                  |
/// | data block N         |
/// | filter block         |   bloom over whole keys and/or prefixes
/// | range-del block      |   range tombstones
/// | properties block     |   JSON TableProperties
/// | index block          |   last internal key of each data block -> handle
/// | footer (72 bytes)    |
/// +----------------------+
/// ```
///
/// Every block ends with a 5 byte trailer: compression type (1) and the
/// crc32 (4) of the stored payload plus the type byte.
///
/// Footer: four block handles (filter, range-del, properties, index, 16
/// bytes each) followed by the magic number.
use crc32fast::Hasher;

use crate::{
    compression::CompressionType,
    util::coding::{decode_fixed64, put_fixed64},
};

pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

pub const BLOCK_TRAILER_SIZE: usize = 5;

pub const FOOTER_SIZE: usize = 72;

pub const MAGIC_NUMBER: u64 = 0x57a7_a6b0_5eed_f00d;

/// Location of a block inside a table file; `size` excludes the trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub const fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    #[inline]
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_fixed64(buf, self.offset);
        put_fixed64(buf, self.size);
    }

    #[inline]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 16 {
            return None;
        }
        Some(BlockHandle {
            offset: decode_fixed64(&data[0..8]),
            size: decode_fixed64(&data[8..16]),
        })
    }

    /// Bytes occupied on disk including the trailer
    pub fn stored_len(&self) -> u64 {
        self.size + BLOCK_TRAILER_SIZE as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub filter_handle: BlockHandle,
    pub range_del_handle: BlockHandle,
    pub properties_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.filter_handle.encode_to(&mut buf);
        self.range_del_handle.encode_to(&mut buf);
        self.properties_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        put_fixed64(&mut buf, MAGIC_NUMBER);

        let mut out = [0u8; FOOTER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(data: &[u8; FOOTER_SIZE]) -> Option<Self> {
        if decode_fixed64(&data[64..72]) != MAGIC_NUMBER {
            return None;
        }
        Some(Footer {
            filter_handle: BlockHandle::decode(&data[0..16])?,
            range_del_handle: BlockHandle::decode(&data[16..32])?,
            properties_handle: BlockHandle::decode(&data[32..48])?,
            index_handle: BlockHandle::decode(&data[48..64])?,
        })
    }
}

/// crc32 over the stored block payload and its compression tag
#[inline]
pub fn block_checksum(payload: &[u8], compression: CompressionType) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.update(&[compression as u8]);
    hasher.finalize()
}

pub fn table_file_name(number: u64) -> String {
    format!("{number:06}.sst")
}

pub fn blob_file_name(number: u64) -> String {
    format!("{number:06}.blob")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_round_trip() {
        let footer = Footer {
            filter_handle: BlockHandle::new(100, 20),
            range_del_handle: BlockHandle::new(125, 0),
            properties_handle: BlockHandle::new(130, 200),
            index_handle: BlockHandle::new(335, 64),
        };
        assert_eq!(Footer::decode(&footer.encode()), Some(footer));
    }

    #[test]
    fn test_footer_rejects_bad_magic() {
        let mut raw = Footer {
            filter_handle: BlockHandle::default(),
            range_del_handle: BlockHandle::default(),
            properties_handle: BlockHandle::default(),
            index_handle: BlockHandle::default(),
        }
        .encode();
        raw[70] ^= 1;
        assert_eq!(Footer::decode(&raw), None);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(table_file_name(7), "000007.sst");
        assert_eq!(blob_file_name(1234567), "1234567.blob");
    }
}
