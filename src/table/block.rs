use bytes::Bytes;

use crate::{
    compression::{self, CompressionType},
    memtable::InternalKey,
    table::format::{BLOCK_TRAILER_SIZE, block_checksum},
    util::{
        Result, Status,
        coding::{Decoder, decode_fixed32},
    },
};

/// Strip and check the trailer of a stored block, returning the
/// uncompressed payload.
pub fn unseal_block(raw: &[u8], verify_checksum: bool) -> Result<Bytes> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(Status::corruption("Block too small"));
    }
    let payload_len = raw.len() - BLOCK_TRAILER_SIZE;
    let payload = &raw[..payload_len];
    let tag = raw[payload_len];
    let compression = CompressionType::from_u8(tag)
        .ok_or_else(|| Status::not_supported(format!("Unknown compression type {tag}")))?;

    if verify_checksum {
        let stored = decode_fixed32(&raw[payload_len + 1..]);
        let actual = block_checksum(payload, compression);
        if stored != actual {
            return Err(Status::corruption(format!(
                "Block checksum mismatch: expected {actual:#x}, got {stored:#x}"
            )));
        }
    }

    match compression {
        CompressionType::None => Ok(Bytes::copy_from_slice(payload)),
        codec => Ok(Bytes::from(compression::decompress(codec, payload)?)),
    }
}

/// A decoded data or index block.
///
/// Keys and values are slices of one shared buffer, so handing them out
/// keeps the block alive instead of copying.
#[derive(Debug)]
pub struct Block {
    entries: Vec<(InternalKey, Bytes)>,
    size: usize,
}

impl Block {
    /// Decode an unsealed payload. A `global_seqno` replaces the sequence of
    /// every entry (ingested tables are written with sequence zero).
    pub fn decode(payload: Bytes, global_seqno: Option<u64>) -> Result<Self> {
        let mut entries = Vec::new();
        let mut decoder = Decoder::new(&payload);
        while !decoder.is_empty() {
            let key = InternalKey::decode_from(&mut decoder, &payload)?;
            let value = decoder.length_prefixed()?;
            let value_end = decoder.position();
            let value = payload.slice(value_end - value.len()..value_end);
            let key = match global_seqno {
                Some(seq) => key.with_sequence(seq),
                None => key,
            };
            entries.push((key, value));
        }
        Ok(Block {
            entries,
            size: payload.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uncompressed size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn entry(&self, index: usize) -> &(InternalKey, Bytes) {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[(InternalKey, Bytes)] {
        &self.entries
    }

    /// Index of the first entry >= `target`, or `len()` if none
    pub fn seek(&self, target: &InternalKey) -> usize {
        self.entries.partition_point(|(key, _)| key < target)
    }

    /// Index of the last entry <= `target`
    pub fn seek_for_prev(&self, target: &InternalKey) -> Option<usize> {
        self.entries
            .partition_point(|(key, _)| key <= target)
            .checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memtable::ValueKind,
        table::block_builder::{BlockBuilder, seal_block},
    };

    fn build(entries: &[(&str, u64)], compression: CompressionType) -> Vec<u8> {
        let mut builder = BlockBuilder::new();
        for (key, seq) in entries {
            let ik = InternalKey::new(Bytes::copy_from_slice(key.as_bytes()), *seq, ValueKind::Value);
            builder.add(&ik, format!("v-{key}-{seq}").as_bytes());
        }
        builder.finish(compression)
    }

    #[test]
    fn test_decode_and_seek() {
        let sealed = build(&[("a", 5), ("a", 2), ("c", 9)], CompressionType::None);
        let block = Block::decode(unseal_block(&sealed, true).unwrap(), None).unwrap();
        assert_eq!(block.len(), 3);

        assert_eq!(block.seek(&InternalKey::for_seek(b"a", 3)), 1);
        assert_eq!(block.seek(&InternalKey::for_seek(b"b", 100)), 2);
        assert_eq!(block.seek(&InternalKey::for_seek(b"d", 100)), 3);

        assert_eq!(block.seek_for_prev(&InternalKey::after_all_versions(b"b")), Some(1));
        assert_eq!(block.seek_for_prev(&InternalKey::for_seek(b"0", 1)), None);
        assert_eq!(block.entry(2).1.as_ref(), b"v-c-9");
    }

    #[test]
    fn test_global_seqno_overrides_sequences() {
        let sealed = build(&[("x", 0), ("y", 0)], CompressionType::Lz4);
        let block = Block::decode(unseal_block(&sealed, true).unwrap(), Some(77)).unwrap();
        assert!(block.entries().iter().all(|(k, _)| k.sequence() == 77));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut sealed = seal_block(b"payload bytes", CompressionType::None);
        sealed[0] ^= 0x01;
        assert!(unseal_block(&sealed, true).unwrap_err().is_corruption());
        // unchecked reads pass the damaged bytes through
        assert!(unseal_block(&sealed, false).is_ok());
    }

    #[test]
    fn test_unknown_codec_not_supported() {
        let mut sealed = seal_block(b"payload bytes", CompressionType::None);
        let tag = sealed.len() - BLOCK_TRAILER_SIZE;
        sealed[tag] = 9;
        assert!(unseal_block(&sealed, false).unwrap_err().is_not_supported());
    }
}
