//! Range compaction: merge the entries of several tables into one stream
//! and drop what no reader can observe any more.
//!
//! Live snapshots split the sequence space into stripes:
//!
//! ```text
//!  seq:  1 ........ s0 | s0+1 ........ s1 | s1+1 ........ last
//!        stripe 0      | stripe 1         | stripe 2
//! ```
//!
//! Every reader sees either all or none of a stripe's versions of a key, so
//! only the newest version per stripe has to survive. Stripe 0 is visible
//! to every reader, which lets its deletions and range tombstones go once
//! they have been applied.

use std::{cmp::Reverse, collections::BinaryHeap};

use bytes::Bytes;

use crate::memtable::{InternalKey, RangeTombstone, ValueKind};

/// Key plus resolved value, as read from an input table
pub type CompactionEntry = (InternalKey, Bytes);

/// Entries and tombstones that survive a compaction
#[derive(Debug, Default)]
pub struct CompactionOutput {
    pub entries: Vec<CompactionEntry>,
    pub range_tombstones: Vec<RangeTombstone>,
}

impl CompactionOutput {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.range_tombstones.is_empty()
    }
}

#[inline]
fn stripe(snapshots: &[u64], sequence: u64) -> usize {
    snapshots.partition_point(|s| *s < sequence)
}

/// K-way merge of runs that are each sorted in internal-key order
pub fn merge_runs(runs: Vec<Vec<CompactionEntry>>) -> Vec<CompactionEntry> {
    let total = runs.iter().map(Vec::len).sum();
    let mut cursors: Vec<std::vec::IntoIter<CompactionEntry>> =
        runs.into_iter().map(Vec::into_iter).collect();

    let mut heap = BinaryHeap::with_capacity(cursors.len());
    let mut pending: Vec<Option<Bytes>> = vec![None; cursors.len()];
    for (i, cursor) in cursors.iter_mut().enumerate() {
        if let Some((key, value)) = cursor.next() {
            heap.push(Reverse((key, i)));
            pending[i] = Some(value);
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse((key, i))) = heap.pop() {
        let value = pending[i].take().unwrap_or_default();
        merged.push((key, value));
        if let Some((next_key, next_value)) = cursors[i].next() {
            heap.push(Reverse((next_key, i)));
            pending[i] = Some(next_value);
        }
    }
    merged
}

/// Drop versions shadowed within their snapshot stripe.
///
/// `entries` must be in internal-key order and hold every version of each
/// key present in the compacted range; `snapshots` must be ascending.
pub fn collect_garbage(
    entries: Vec<CompactionEntry>,
    tombstones: Vec<RangeTombstone>,
    snapshots: &[u64],
) -> CompactionOutput {
    let mut output = CompactionOutput::default();
    let mut current_key: Option<Bytes> = None;
    let mut last_stripe = usize::MAX;

    for (key, value) in entries {
        if current_key.as_deref() != Some(key.user_key()) {
            current_key = Some(key.user_key_bytes().clone());
            last_stripe = usize::MAX;
        }

        let entry_stripe = stripe(snapshots, key.sequence());
        // Newer version in the same stripe already emitted or skipped
        if entry_stripe == last_stripe {
            continue;
        }
        last_stripe = entry_stripe;

        let covered = tombstones.iter().any(|t| {
            t.sequence > key.sequence()
                && t.covers(key.user_key())
                && stripe(snapshots, t.sequence) == entry_stripe
        });
        if covered {
            continue;
        }
        if key.kind() == ValueKind::Deletion && entry_stripe == 0 {
            continue;
        }

        let key = if key.kind() == ValueKind::BlobIndex {
            InternalKey::new(key.user_key_bytes().clone(), key.sequence(), ValueKind::Value)
        } else {
            key
        };
        output.entries.push((key, value));
    }

    output.range_tombstones = tombstones
        .into_iter()
        .filter(|t| stripe(snapshots, t.sequence) > 0)
        .collect();
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, seq: u64, value: &str) -> CompactionEntry {
        (
            InternalKey::new(Bytes::copy_from_slice(key.as_bytes()), seq, ValueKind::Value),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    fn del(key: &str, seq: u64) -> CompactionEntry {
        (
            InternalKey::new(Bytes::copy_from_slice(key.as_bytes()), seq, ValueKind::Deletion),
            Bytes::new(),
        )
    }

    fn render(output: &CompactionOutput) -> Vec<(String, u64)> {
        output
            .entries
            .iter()
            .map(|(k, _)| (String::from_utf8_lossy(k.user_key()).to_string(), k.sequence()))
            .collect()
    }

    #[test]
    fn test_merge_runs_orders_internal_keys() {
        let merged = merge_runs(vec![
            vec![put("a", 1, "a1"), put("c", 5, "c5")],
            vec![put("a", 3, "a3"), put("b", 2, "b2")],
            vec![],
        ]);
        let keys: Vec<(Vec<u8>, u64)> = merged
            .iter()
            .map(|(k, _)| (k.user_key().to_vec(), k.sequence()))
            .collect();
        assert_eq!(keys, vec![
            (b"a".to_vec(), 3),
            (b"a".to_vec(), 1),
            (b"b".to_vec(), 2),
            (b"c".to_vec(), 5),
        ]);
        assert_eq!(merged[0].1.as_ref(), b"a3");
    }

    #[test]
    fn test_no_snapshots_keeps_newest_only() {
        let entries = vec![put("a", 3, "new"), put("a", 1, "old"), del("b", 4), put("b", 2, "x")];
        let output = collect_garbage(entries, Vec::new(), &[]);
        assert_eq!(render(&output), vec![("a".to_string(), 3)]);
        assert_eq!(output.entries[0].1.as_ref(), b"new");
    }

    #[test]
    fn test_snapshot_keeps_visible_version() {
        // Snapshot at 2 still sees a@1 and b@2
        let entries = vec![put("a", 3, "new"), put("a", 1, "old"), del("b", 4), put("b", 2, "x")];
        let output = collect_garbage(entries, Vec::new(), &[2]);
        assert_eq!(render(&output), vec![
            ("a".to_string(), 3),
            ("a".to_string(), 1),
            ("b".to_string(), 4),
            ("b".to_string(), 2),
        ]);
    }

    #[test]
    fn test_range_tombstones() {
        let entries = vec![put("b", 1, "b"), put("c", 5, "c"), put("d", 2, "d")];
        let tombstones = vec![RangeTombstone::new(Bytes::from("a"), Bytes::from("d"), 4)];

        let output = collect_garbage(entries.clone(), tombstones.clone(), &[]);
        assert_eq!(render(&output), vec![("c".to_string(), 5), ("d".to_string(), 2)]);
        assert!(output.range_tombstones.is_empty());

        // A snapshot between the write and the tombstone pins both
        let output = collect_garbage(entries, tombstones, &[3]);
        assert_eq!(render(&output), vec![
            ("b".to_string(), 1),
            ("c".to_string(), 5),
            ("d".to_string(), 2),
        ]);
        assert_eq!(output.range_tombstones.len(), 1);
    }

    #[test]
    fn test_everything_deleted_is_empty() {
        let output = collect_garbage(vec![del("a", 2), put("a", 1, "x")], Vec::new(), &[]);
        assert!(output.is_empty());
    }
}
