use bytes::Bytes;

use crate::util::{
    Result,
    coding::{Decoder, put_fixed64, put_length_prefixed},
};

/// Deletion of every key in `[start, end)` written at `sequence`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Bytes,
    pub end: Bytes,
    pub sequence: u64,
}

impl RangeTombstone {
    pub fn new(start: Bytes, end: Bytes, sequence: u64) -> Self {
        RangeTombstone {
            start,
            end,
            sequence,
        }
    }

    #[inline]
    pub fn covers(&self, key: &[u8]) -> bool {
        self.start.as_ref() <= key && key < self.end.as_ref()
    }

    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.start.as_ref() <= largest && smallest < self.end.as_ref()
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_length_prefixed(buf, &self.start);
        put_length_prefixed(buf, &self.end);
        put_fixed64(buf, self.sequence);
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let start = Bytes::copy_from_slice(decoder.length_prefixed()?);
        let end = Bytes::copy_from_slice(decoder.length_prefixed()?);
        let sequence = decoder.fixed64()?;
        Ok(RangeTombstone::new(start, end, sequence))
    }
}

/// Range tombstones gathered from every source of a read view, sorted by
/// start key.
#[derive(Debug, Clone, Default)]
pub struct RangeDelAggregator {
    tombstones: Vec<RangeTombstone>,
}

impl RangeDelAggregator {
    /// Keep only tombstones visible at `read_sequence`
    pub fn new(mut tombstones: Vec<RangeTombstone>, read_sequence: u64) -> Self {
        tombstones.retain(|t| t.sequence <= read_sequence && t.start < t.end);
        tombstones.sort_by(|a, b| a.start.cmp(&b.start));
        RangeDelAggregator { tombstones }
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }

    /// Sequence of the newest tombstone covering `key`, or 0
    pub fn max_covering_sequence(&self, key: &[u8]) -> u64 {
        let candidates = self
            .tombstones
            .partition_point(|t| t.start.as_ref() <= key);
        self.tombstones[..candidates]
            .iter()
            .filter(|t| key < t.end.as_ref())
            .map(|t| t.sequence)
            .max()
            .unwrap_or(0)
    }

    /// True when an entry for `key` written at `sequence` is hidden by a
    /// newer range deletion
    #[inline]
    pub fn should_delete(&self, key: &[u8], sequence: u64) -> bool {
        !self.tombstones.is_empty() && self.max_covering_sequence(key) > sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tombstone(start: &'static str, end: &'static str, seq: u64) -> RangeTombstone {
        RangeTombstone::new(
            Bytes::from_static(start.as_bytes()),
            Bytes::from_static(end.as_bytes()),
            seq,
        )
    }

    #[test]
    fn test_half_open_coverage() {
        let t = tombstone("b", "d", 5);
        assert!(!t.covers(b"a"));
        assert!(t.covers(b"b"));
        assert!(t.covers(b"c\xff"));
        assert!(!t.covers(b"d"));
    }

    #[test]
    fn test_aggregator_respects_read_sequence() {
        let agg = RangeDelAggregator::new(vec![tombstone("a", "z", 10), tombstone("c", "e", 3)], 5);
        assert_eq!(agg.max_covering_sequence(b"d"), 3);
        assert_eq!(agg.max_covering_sequence(b"x"), 0);
        assert!(agg.should_delete(b"d", 2));
        assert!(!agg.should_delete(b"d", 4));
    }

    #[test]
    fn test_aggregator_picks_newest_overlap() {
        let agg = RangeDelAggregator::new(
            vec![tombstone("a", "m", 4), tombstone("f", "k", 9), tombstone("j", "q", 7)],
            100,
        );
        assert_eq!(agg.max_covering_sequence(b"g"), 9);
        assert_eq!(agg.max_covering_sequence(b"k"), 7);
        assert_eq!(agg.max_covering_sequence(b"b"), 4);
    }
}
