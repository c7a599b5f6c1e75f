use crate::{
    compression::{self, CompressionType},
    memtable::InternalKey,
    table::format::block_checksum,
    util::coding::{put_fixed32, put_length_prefixed},
};

/// Accumulates sorted entries of one data or index block.
///
/// Entry layout: `internal key | varint value len | value`.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    num_entries: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        BlockBuilder {
            buffer: Vec::new(),
            num_entries: 0,
        }
    }

    pub fn add(&mut self, key: &InternalKey, value: &[u8]) {
        key.encode_to(&mut self.buffer);
        put_length_prefixed(&mut self.buffer, value);
        self.num_entries += 1;
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Seal the block and reset the builder for reuse
    pub fn finish(&mut self, compression: CompressionType) -> Vec<u8> {
        let sealed = seal_block(&self.buffer, compression);
        self.buffer.clear();
        self.num_entries = 0;
        sealed
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compress `payload` when that saves space and append the trailer
pub fn seal_block(payload: &[u8], compression: CompressionType) -> Vec<u8> {
    let (mut stored, used) = match compression {
        CompressionType::None => (payload.to_vec(), CompressionType::None),
        codec => match compression::compress(codec, payload) {
            Ok(data) if data.len() < payload.len() => (data, codec),
            _ => (payload.to_vec(), CompressionType::None),
        },
    };
    let checksum = block_checksum(&stored, used);
    stored.push(used as u8);
    put_fixed32(&mut stored, checksum);
    stored
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{memtable::ValueKind, table::format::BLOCK_TRAILER_SIZE};

    #[test]
    fn test_incompressible_block_stays_raw() {
        let payload: Vec<u8> = (0..64u8).collect();
        let sealed = seal_block(&payload, CompressionType::Lz4);
        assert_eq!(sealed.len(), payload.len() + BLOCK_TRAILER_SIZE);
        assert_eq!(sealed[payload.len()], CompressionType::None as u8);
    }

    #[test]
    fn test_repetitive_block_is_compressed() {
        let mut builder = BlockBuilder::new();
        for i in 0..200u64 {
            let key = InternalKey::new(Bytes::from(format!("key{i:05}")), i, ValueKind::Value);
            builder.add(&key, b"the same value again and again");
        }
        let raw_len = builder.current_size_estimate();
        let sealed = builder.finish(CompressionType::Snappy);
        assert!(sealed.len() < raw_len);
        assert!(builder.is_empty());
    }
}
