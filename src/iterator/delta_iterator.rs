use std::cmp::Ordering;

use bytes::Bytes;

use crate::{iterator::UserIterator, util::Result};

/// One uncommitted write of a transaction, as seen by its iterators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEntry {
    pub key: Bytes,
    /// `None` for a deletion
    pub value: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Current {
    Base,
    Delta,
}

/// Layers a transaction's own writes over a committed-data cursor.
///
/// The delta is a key-sorted, de-duplicated copy of the write set taken when
/// the iterator was created; a delta entry shadows the base entry with the
/// same key, and delta deletions hide it.
pub struct DeltaIterator {
    base: UserIterator,
    delta: Vec<DeltaEntry>,
    /// Index of the delta cursor; `delta.len()` or `None` when exhausted
    delta_pos: Option<usize>,
    current: Option<Current>,
    direction: Direction,
}

impl DeltaIterator {
    pub fn new(base: UserIterator, delta: Vec<DeltaEntry>) -> Self {
        DeltaIterator {
            base,
            delta,
            delta_pos: None,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn in_range(&self, key: &[u8]) -> bool {
        let options = self.base.options();
        if let Some(lower) = &options.lower_bound
            && key < lower.as_ref()
        {
            return false;
        }
        if let Some(upper) = &options.upper_bound
            && key >= upper.as_ref()
        {
            return false;
        }
        match (self.base.active_prefix(), &options.prefix_extractor) {
            (Some(prefix), Some(extractor)) => extractor.transform(key) == Some(prefix),
            _ => true,
        }
    }

    /// Delta entry under the cursor if it lies inside bounds and prefix
    fn delta_entry(&self) -> Option<&DeltaEntry> {
        let entry = self.delta.get(self.delta_pos?)?;
        self.in_range(&entry.key).then_some(entry)
    }

    fn delta_forward(&mut self) {
        self.delta_pos = self.delta_pos.map(|p| p + 1);
    }

    fn delta_backward(&mut self) {
        self.delta_pos = self.delta_pos.and_then(|p| p.checked_sub(1));
    }

    /// First delta index with key >= target
    fn delta_seek(&mut self, target: &[u8]) {
        self.delta_pos = Some(self.delta.partition_point(|e| e.key.as_ref() < target));
    }

    /// Last delta index with key <= target
    fn delta_seek_for_prev(&mut self, target: &[u8]) {
        self.delta_pos = self
            .delta
            .partition_point(|e| e.key.as_ref() <= target)
            .checked_sub(1);
    }

    fn settle_forward(&mut self) -> Result<bool> {
        self.direction = Direction::Forward;
        loop {
            let delta = self.delta_entry().map(|e| (e.key.clone(), e.value.is_none()));
            let base_valid = self.base.valid();
            self.current = match (base_valid, delta) {
                (false, None) => None,
                (true, None) => Some(Current::Base),
                (false, Some((_, deleted))) => {
                    if deleted {
                        self.delta_forward();
                        continue;
                    }
                    Some(Current::Delta)
                },
                (true, Some((key, deleted))) => match self.base.key().cmp(key.as_ref()) {
                    Ordering::Less => Some(Current::Base),
                    Ordering::Greater if deleted => {
                        self.delta_forward();
                        continue;
                    },
                    Ordering::Greater => Some(Current::Delta),
                    Ordering::Equal if deleted => {
                        self.delta_forward();
                        self.base.next()?;
                        continue;
                    },
                    Ordering::Equal => Some(Current::Delta),
                },
            };
            return Ok(self.current.is_some());
        }
    }

    fn settle_reverse(&mut self) -> Result<bool> {
        self.direction = Direction::Reverse;
        loop {
            let delta = self.delta_entry().map(|e| (e.key.clone(), e.value.is_none()));
            let base_valid = self.base.valid();
            self.current = match (base_valid, delta) {
                (false, None) => None,
                (true, None) => Some(Current::Base),
                (false, Some((_, deleted))) => {
                    if deleted {
                        self.delta_backward();
                        continue;
                    }
                    Some(Current::Delta)
                },
                (true, Some((key, deleted))) => match self.base.key().cmp(key.as_ref()) {
                    Ordering::Greater => Some(Current::Base),
                    Ordering::Less if deleted => {
                        self.delta_backward();
                        continue;
                    },
                    Ordering::Less => Some(Current::Delta),
                    Ordering::Equal if deleted => {
                        self.delta_backward();
                        self.base.prev()?;
                        continue;
                    },
                    Ordering::Equal => Some(Current::Delta),
                },
            };
            return Ok(self.current.is_some());
        }
    }

    pub fn seek(&mut self, target: &[u8]) -> Result<bool> {
        self.base.seek(target)?;
        let target = match &self.base.options().lower_bound {
            Some(lower) if target < lower.as_ref() => lower.to_vec(),
            _ => target.to_vec(),
        };
        self.delta_seek(&target);
        self.settle_forward()
    }

    pub fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool> {
        self.base.seek_for_prev(target)?;
        self.delta_seek_for_prev(target);
        self.settle_reverse()
    }

    pub fn seek_to_first(&mut self) -> Result<bool> {
        self.base.seek_to_first()?;
        match self.base.options().lower_bound.clone() {
            Some(lower) => self.delta_seek(&lower),
            None => self.delta_pos = Some(0),
        }
        self.settle_forward()
    }

    pub fn seek_to_last(&mut self) -> Result<bool> {
        self.base.seek_to_last()?;
        match self.base.options().upper_bound.clone() {
            Some(upper) => {
                self.delta_pos = self
                    .delta
                    .partition_point(|e| e.key.as_ref() < upper.as_ref())
                    .checked_sub(1)
            },
            None => self.delta_pos = self.delta.len().checked_sub(1),
        }
        self.settle_reverse()
    }

    pub fn next(&mut self) -> Result<bool> {
        let Some(current) = self.current else {
            return Ok(false);
        };
        let key = self.key().to_vec();

        if self.direction == Direction::Reverse {
            self.base.seek(&key)?;
            if self.base.valid() && self.base.key() == key.as_slice() {
                self.base.next()?;
            }
            self.delta_pos = Some(self.delta.partition_point(|e| e.key.as_ref() <= key.as_slice()));
            return self.settle_forward();
        }

        match current {
            Current::Base => {
                self.base.next()?;
            },
            Current::Delta => {
                if self.base.valid() && self.base.key() == key.as_slice() {
                    self.base.next()?;
                }
                self.delta_forward();
            },
        }
        self.settle_forward()
    }

    pub fn prev(&mut self) -> Result<bool> {
        let Some(current) = self.current else {
            return Ok(false);
        };
        let key = self.key().to_vec();

        if self.direction == Direction::Forward {
            self.base.seek_for_prev(&key)?;
            if self.base.valid() && self.base.key() == key.as_slice() {
                self.base.prev()?;
            }
            self.delta_pos = self
                .delta
                .partition_point(|e| e.key.as_ref() < key.as_slice())
                .checked_sub(1);
            return self.settle_reverse();
        }

        match current {
            Current::Base => {
                self.base.prev()?;
            },
            Current::Delta => {
                if self.base.valid() && self.base.key() == key.as_slice() {
                    self.base.prev()?;
                }
                self.delta_backward();
            },
        }
        self.settle_reverse()
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> &[u8] {
        match self.current {
            Some(Current::Base) => self.base.key(),
            Some(Current::Delta) => self.delta_entry().map_or(&[], |e| e.key.as_ref()),
            None => &[],
        }
    }

    pub fn value(&self) -> Bytes {
        match self.current {
            Some(Current::Base) => self.base.value().clone(),
            Some(Current::Delta) => self
                .delta_entry()
                .and_then(|e| e.value.clone())
                .unwrap_or_default(),
            None => Bytes::new(),
        }
    }

    pub fn status(&self) -> Result<()> {
        self.base.status()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        iterator::UserIteratorOptions,
        memtable::{MemTable, ValueKind},
        version::Version,
    };

    fn base(options: UserIteratorOptions) -> UserIterator {
        let mem = Arc::new(MemTable::new());
        for (i, key) in ["a", "c", "e", "g"].iter().enumerate() {
            mem.add(i as u64 + 1, ValueKind::Value, key.as_bytes(), b"base");
        }
        UserIterator::new(Arc::new(Version::new(mem, Vec::new())), 10, options)
    }

    fn delta() -> Vec<DeltaEntry> {
        vec![
            DeltaEntry {
                key: Bytes::from_static(b"b"),
                value: Some(Bytes::from_static(b"mine")),
            },
            DeltaEntry {
                key: Bytes::from_static(b"c"),
                value: None,
            },
            DeltaEntry {
                key: Bytes::from_static(b"e"),
                value: Some(Bytes::from_static(b"over")),
            },
        ]
    }

    fn forward(iter: &mut DeltaIterator) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut ok = iter.seek_to_first().unwrap();
        while ok {
            out.push((
                String::from_utf8_lossy(iter.key()).into_owned(),
                String::from_utf8_lossy(&iter.value()).into_owned(),
            ));
            ok = iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_overlay_forward_and_back() {
        let mut iter = DeltaIterator::new(base(UserIteratorOptions::default()), delta());
        let expected: Vec<(String, String)> = [("a", "base"), ("b", "mine"), ("e", "over"), ("g", "base")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(forward(&mut iter), expected);

        assert!(iter.seek_to_last().unwrap());
        assert_eq!(iter.key(), b"g");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"e");
        assert_eq!(iter.value().as_ref(), b"over");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"e");
        assert!(iter.prev().unwrap());
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"a");
        assert!(!iter.prev().unwrap());
    }

    #[test]
    fn test_overlay_respects_bounds() {
        let options = UserIteratorOptions {
            lower_bound: Some(Bytes::from_static(b"b")),
            upper_bound: Some(Bytes::from_static(b"f")),
            ..Default::default()
        };
        let mut iter = DeltaIterator::new(base(options), delta());
        let keys: Vec<String> = forward(&mut iter).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "e"]);

        assert!(iter.seek_for_prev(b"d").unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.seek(b"c").unwrap());
        assert_eq!(iter.key(), b"e");
    }
}
