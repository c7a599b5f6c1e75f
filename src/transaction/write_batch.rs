use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use crate::{
    iterator::DeltaEntry,
    util::{
        Result, Status,
        coding::{Decoder, put_fixed32, put_fixed64, put_length_prefixed, put_varint},
    },
};

const TAG_DELETE: u8 = 0;
const TAG_PUT: u8 = 1;
const TAG_DELETE_RANGE: u8 = 2;

/// Write operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
    /// Deletes `[start, end)`
    DeleteRange { start: Bytes, end: Bytes },
}

impl WriteOp {
    fn encoded_size(&self) -> usize {
        match self {
            WriteOp::Put { key, value } => key.len() + value.len(),
            WriteOp::Delete { key } => key.len(),
            WriteOp::DeleteRange { start, end } => start.len() + end.len(),
        }
    }
}

/// WriteBatch accumulates write operations applied atomically.
///
/// Each operation carries a column family tag. Batches built by callers
/// are tagged with handle-table indices; the database rewrites them to
/// family ids before the batch reaches the WAL.
///
/// A per-family index of the latest point operation per key serves
/// read-your-writes lookups and transaction iterators.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Operations in insertion order
    ops: Vec<(u32, WriteOp)>,
    /// cf -> key -> latest op index
    index: HashMap<u32, BTreeMap<Bytes, usize>>,
    /// Approximate memory usage in bytes
    data_size: usize,
}

impl WriteBatch {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        WriteBatch {
            ops: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn put(&mut self, cf: u32, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.push(
            cf,
            WriteOp::Put {
                key: Bytes::copy_from_slice(key.as_ref()),
                value: Bytes::copy_from_slice(value.as_ref()),
            },
        );
    }

    pub fn delete(&mut self, cf: u32, key: impl AsRef<[u8]>) {
        self.push(
            cf,
            WriteOp::Delete {
                key: Bytes::copy_from_slice(key.as_ref()),
            },
        );
    }

    /// Delete every key in `[start, end)`
    pub fn delete_range(&mut self, cf: u32, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) {
        self.push(
            cf,
            WriteOp::DeleteRange {
                start: Bytes::copy_from_slice(start.as_ref()),
                end: Bytes::copy_from_slice(end.as_ref()),
            },
        );
    }

    pub(crate) fn push(&mut self, cf: u32, op: WriteOp) {
        self.data_size += op.encoded_size();
        self.add_to_index(cf, &op, self.ops.len());
        self.ops.push((cf, op));
    }

    #[inline]
    fn add_to_index(&mut self, cf: u32, op: &WriteOp, op_index: usize) {
        let key = match op {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key.clone(),
            WriteOp::DeleteRange { .. } => return,
        };
        self.index.entry(cf).or_default().insert(key, op_index);
    }

    /// Latest point operation on `key` (for read-your-writes)
    pub fn get_for_update(&self, cf: u32, key: &[u8]) -> Option<&WriteOp> {
        self.index
            .get(&cf)?
            .get(key)
            .and_then(|&idx| self.ops.get(idx).map(|(_, op)| op))
    }

    #[inline]
    pub fn contains_key(&self, cf: u32, key: &[u8]) -> bool {
        self.index.get(&cf).is_some_and(|cf_index| cf_index.contains_key(key))
    }

    #[inline]
    pub fn ops(&self) -> &[(u32, WriteOp)] {
        &self.ops
    }

    pub fn has_range_deletions(&self) -> bool {
        self.ops
            .iter()
            .any(|(_, op)| matches!(op, WriteOp::DeleteRange { .. }))
    }

    /// Number of operations in the batch
    #[inline]
    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.index.clear();
        self.data_size = 0;
    }

    /// Drop every operation after the first `len`
    pub fn truncate(&mut self, len: usize) {
        if len >= self.ops.len() {
            return;
        }
        self.ops.truncate(len);
        self.index.clear();
        self.data_size = 0;
        let ops = std::mem::take(&mut self.ops);
        for (i, (cf, op)) in ops.iter().enumerate() {
            self.data_size += op.encoded_size();
            self.add_to_index(*cf, op, i);
        }
        self.ops = ops;
    }

    /// Approximate memory usage in bytes
    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rewrite every column family tag through `f`
    pub(crate) fn remap_column_families<F>(self, mut f: F) -> Result<WriteBatch>
    where
        F: FnMut(u32) -> Result<u32>,
    {
        let mut out = WriteBatch::with_capacity(self.ops.len());
        for (cf, op) in self.ops {
            out.push(f(cf)?, op);
        }
        Ok(out)
    }

    /// Key-sorted view of the latest point writes to `cf`
    pub fn delta(&self, cf: u32) -> Vec<DeltaEntry> {
        let Some(cf_index) = self.index.get(&cf) else {
            return Vec::new();
        };
        cf_index
            .iter()
            .filter_map(|(key, &idx)| match &self.ops.get(idx)?.1 {
                WriteOp::Put { value, .. } => Some(DeltaEntry {
                    key: key.clone(),
                    value: Some(value.clone()),
                }),
                WriteOp::Delete { .. } => Some(DeltaEntry {
                    key: key.clone(),
                    value: None,
                }),
                WriteOp::DeleteRange { .. } => None,
            })
            .collect()
    }

    /// Point keys written by this batch, sorted and de-duplicated
    pub fn locked_keys(&self) -> Vec<(u32, Bytes)> {
        let mut keys: Vec<(u32, Bytes)> = self
            .index
            .iter()
            .flat_map(|(cf, keys)| keys.keys().map(move |k| (*cf, k.clone())))
            .collect();
        keys.sort();
        keys
    }

    /// WAL record: fixed64 first sequence, fixed32 count, then each op as
    /// tag byte, varint column family, length-prefixed key(s) and value.
    pub fn encode(&self, sequence: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.data_size + self.ops.len() * 8);
        put_fixed64(&mut buf, sequence);
        put_fixed32(&mut buf, self.ops.len() as u32);
        for (cf, op) in &self.ops {
            match op {
                WriteOp::Put { key, value } => {
                    buf.push(TAG_PUT);
                    put_varint(&mut buf, *cf as u64);
                    put_length_prefixed(&mut buf, key);
                    put_length_prefixed(&mut buf, value);
                },
                WriteOp::Delete { key } => {
                    buf.push(TAG_DELETE);
                    put_varint(&mut buf, *cf as u64);
                    put_length_prefixed(&mut buf, key);
                },
                WriteOp::DeleteRange { start, end } => {
                    buf.push(TAG_DELETE_RANGE);
                    put_varint(&mut buf, *cf as u64);
                    put_length_prefixed(&mut buf, start);
                    put_length_prefixed(&mut buf, end);
                },
            }
        }
        buf
    }

    /// Inverse of `encode`, returning the first sequence and the batch
    pub fn decode(data: &[u8]) -> Result<(u64, WriteBatch)> {
        let mut decoder = Decoder::new(data);
        let sequence = decoder.fixed64()?;
        let count = decoder.fixed32()? as usize;
        let mut batch = WriteBatch::with_capacity(count);
        for _ in 0..count {
            let tag = decoder.u8()?;
            let cf = u32::try_from(decoder.varint()?)
                .map_err(|_| Status::corruption("Column family id out of range"))?;
            let first = Bytes::copy_from_slice(decoder.length_prefixed()?);
            let op = match tag {
                TAG_PUT => WriteOp::Put {
                    key: first,
                    value: Bytes::copy_from_slice(decoder.length_prefixed()?),
                },
                TAG_DELETE => WriteOp::Delete { key: first },
                TAG_DELETE_RANGE => WriteOp::DeleteRange {
                    start: first,
                    end: Bytes::copy_from_slice(decoder.length_prefixed()?),
                },
                other => {
                    return Err(Status::corruption(format!("Unknown write batch tag {other}")));
                },
            };
            batch.push(cf, op);
        }
        if !decoder.is_empty() {
            return Err(Status::corruption("Trailing bytes after write batch"));
        }
        Ok((sequence, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_basic() {
        let mut batch = WriteBatch::new();
        batch.put(0, "key1", "value1");
        batch.put(0, "key2", "value2");
        batch.delete(0, "key3");

        assert_eq!(batch.count(), 3);
        assert_eq!(batch.data_size(), 4 + 6 + 4 + 6 + 4);
    }

    #[test]
    fn test_write_batch_index() {
        let mut batch = WriteBatch::new();
        batch.put(0, "key1", "value1");
        batch.put(0, "key1", "value2");

        match batch.get_for_update(0, b"key1") {
            Some(WriteOp::Put { value, .. }) => assert_eq!(value.as_ref(), b"value2"),
            other => panic!("Expected Put operation, got {other:?}"),
        }
    }

    #[test]
    fn test_write_batch_multi_cf() {
        let mut batch = WriteBatch::new();
        batch.put(0, "key1", "value1");
        batch.put(1, "key1", "value2");

        assert!(batch.contains_key(0, b"key1"));
        assert!(batch.contains_key(1, b"key1"));
        assert!(!batch.contains_key(2, b"key1"));
        assert_eq!(batch.delta(1)[0].value.as_deref(), Some(&b"value2"[..]));
    }

    #[test]
    fn test_truncate_rebuilds_index() {
        let mut batch = WriteBatch::new();
        batch.put(0, "k", "1");
        let mark = batch.count();
        batch.put(0, "k", "2");
        batch.delete(0, "j");

        batch.truncate(mark);
        assert_eq!(batch.count(), 1);
        assert!(!batch.contains_key(0, b"j"));
        match batch.get_for_update(0, b"k") {
            Some(WriteOp::Put { value, .. }) => assert_eq!(value.as_ref(), b"1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(batch.data_size(), 2);
    }

    #[test]
    fn test_delta_sorted_with_deletions() {
        let mut batch = WriteBatch::new();
        batch.put(3, "c", "3");
        batch.put(3, "a", "1");
        batch.delete(3, "b");
        batch.delete_range(3, "x", "z");

        let delta = batch.delta(3);
        let keys: Vec<&[u8]> = delta.iter().map(|e| e.key.as_ref()).collect();
        assert_eq!(keys, vec![&b"a"[..], b"b", b"c"]);
        assert!(delta[1].value.is_none());
        assert!(batch.has_range_deletions());
    }

    #[test]
    fn test_encode_decode() {
        let mut batch = WriteBatch::new();
        batch.put(0, "a", "1");
        batch.delete(7, "b");
        batch.delete_range(2, "c", "f");

        let encoded = batch.encode(42);
        let (sequence, decoded) = WriteBatch::decode(&encoded).unwrap();
        assert_eq!(sequence, 42);
        assert_eq!(decoded.ops(), batch.ops());

        assert!(WriteBatch::decode(&encoded[..encoded.len() - 1]).is_err());
        let mut bad = encoded.clone();
        bad[12] = 9;
        assert!(WriteBatch::decode(&bad).unwrap_err().is_corruption());
    }

    #[test]
    fn test_remap_column_families() {
        let mut batch = WriteBatch::new();
        batch.put(0, "a", "1");
        batch.put(1, "b", "2");

        let remapped = batch.remap_column_families(|cf| Ok(cf + 10)).unwrap();
        assert!(remapped.contains_key(10, b"a"));
        assert!(remapped.contains_key(11, b"b"));

        let mut batch = WriteBatch::new();
        batch.put(5, "a", "1");
        assert!(
            batch
                .remap_column_families(|_| Err(Status::invalid_argument("gone")))
                .unwrap_err()
                .is_invalid_argument()
        );
    }
}
