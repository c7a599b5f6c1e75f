use std::cmp::Ordering;

use bytes::Bytes;

use crate::util::{
    Result, Status,
    coding::{Decoder, put_fixed64, put_length_prefixed},
};

/// Largest sequence number; seeking with it lands on the newest version of a
/// user key.
pub const MAX_SEQUENCE: u64 = u64::MAX;

/// Type tag stored with every versioned entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
    /// Value lives in the table's blob sidecar; the stored bytes are a
    /// reference into it.
    BlobIndex = 2,
}

impl ValueKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueKind::Deletion),
            1 => Some(ValueKind::Value),
            2 => Some(ValueKind::BlobIndex),
            _ => None,
        }
    }
}

/// A user key tagged with the sequence number that wrote it.
///
/// Ordering is user key ascending, then sequence descending, so the newest
/// version of a key is met first during a forward scan:
///
/// ```text
/// ("a", 9) < ("a", 4) < ("b", 12) < ("b", 1)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    user_key: Bytes,
    sequence: u64,
    kind: ValueKind,
}

/// Returned by cursors asked for a key while unpositioned
pub(crate) static EMPTY_INTERNAL_KEY: InternalKey = InternalKey {
    user_key: Bytes::new(),
    sequence: 0,
    kind: ValueKind::Deletion,
};

impl InternalKey {
    pub fn new(user_key: Bytes, sequence: u64, kind: ValueKind) -> Self {
        InternalKey {
            user_key,
            sequence,
            kind,
        }
    }

    /// Smallest internal key for `user_key` visible at `sequence`
    pub fn for_seek(user_key: &[u8], sequence: u64) -> Self {
        InternalKey::new(
            Bytes::copy_from_slice(user_key),
            sequence,
            ValueKind::BlobIndex,
        )
    }

    /// Largest internal key for `user_key`: sorts after every version of it
    pub fn after_all_versions(user_key: &[u8]) -> Self {
        InternalKey::new(Bytes::copy_from_slice(user_key), 0, ValueKind::Deletion)
    }

    #[inline]
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    #[inline]
    pub fn user_key_bytes(&self) -> &Bytes {
        &self.user_key
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn with_sequence(&self, sequence: u64) -> Self {
        InternalKey::new(self.user_key.clone(), sequence, self.kind)
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_length_prefixed(buf, &self.user_key);
        put_fixed64(buf, self.sequence);
        buf.push(self.kind as u8);
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8 + 1 + 5
    }

    /// Decode a key written by `encode_to`, slicing the user key out of
    /// `backing` without copying.
    pub fn decode_from(decoder: &mut Decoder<'_>, backing: &Bytes) -> Result<Self> {
        let user_key = decoder.length_prefixed()?;
        let key_end = decoder.position();
        let key_start = key_end - user_key.len();
        let sequence = decoder.fixed64()?;
        let kind = ValueKind::from_u8(decoder.u8()?)
            .ok_or_else(|| Status::corruption("invalid value kind"))?;
        Ok(InternalKey {
            user_key: backing.slice(key_start..key_end),
            sequence,
            kind,
        })
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .as_ref()
            .cmp(other.user_key.as_ref())
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.kind.cmp(&self.kind))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
