use std::sync::Arc;

use bytes::Bytes;

use crate::{
    column_family::PrefixExtractor,
    iterator::{InternalIterator, MemTableIterator, MergingIterator, TableIterator},
    memtable::{InternalKey, MAX_SEQUENCE, RangeDelAggregator, ValueKind},
    table::BlockReadSettings,
    util::{Result, Status},
    version::Version,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Read configuration of a [`UserIterator`]
#[derive(Debug, Clone, Default)]
pub struct UserIteratorOptions {
    /// Inclusive lower bound
    pub lower_bound: Option<Bytes>,
    /// Exclusive upper bound
    pub upper_bound: Option<Bytes>,
    pub prefix_extractor: Option<PrefixExtractor>,
    /// Stop once keys leave the prefix of the seek target
    pub prefix_same_as_start: bool,
    /// Never use prefix filters to skip tables
    pub total_order_seek: bool,
    /// Use prefix filters when the upper bound keeps the scan inside the
    /// seek target's prefix
    pub auto_prefix_mode: bool,
    /// Hand out values that share the block buffer instead of copies
    pub pin_data: bool,
    pub settings: BlockReadSettings,
}

/// Collapses the internal-key stream of a `Version` into the newest visible
/// version of each user key at a fixed sequence, dropping deletions and
/// range-deleted entries and honouring bounds and prefix mode.
pub struct UserIterator {
    version: Arc<Version>,
    sequence: u64,
    options: UserIteratorOptions,
    range_del: RangeDelAggregator,
    inner: MergingIterator,
    /// Prefix the current `inner` was filtered with
    filtered_for: Option<Vec<u8>>,
    /// Prefix iteration is confined to, for `prefix_same_as_start`
    prefix: Option<Vec<u8>>,
    direction: Direction,
    valid: bool,
    key: Vec<u8>,
    value: Bytes,
    status: Option<Status>,
}

impl UserIterator {
    pub fn new(version: Arc<Version>, sequence: u64, options: UserIteratorOptions) -> Self {
        let range_del = version.range_deletions(sequence);
        let inner = Self::build(&version, &options, None);
        UserIterator {
            version,
            sequence,
            options,
            range_del,
            inner,
            filtered_for: None,
            prefix: None,
            direction: Direction::Forward,
            valid: false,
            key: Vec::new(),
            value: Bytes::new(),
            status: None,
        }
    }

    fn build(
        version: &Version,
        options: &UserIteratorOptions,
        filter_prefix: Option<&[u8]>,
    ) -> MergingIterator {
        let mut children: Vec<Box<dyn InternalIterator>> =
            vec![Box::new(MemTableIterator::new(Arc::clone(&version.mem)))];
        for file in &version.files {
            if let (Some(prefix), Some(extractor)) = (filter_prefix, &options.prefix_extractor)
                && !file.reader().prefix_may_match(extractor, prefix)
            {
                continue;
            }
            if let Some(lower) = &options.lower_bound
                && file.largest() < lower.as_ref()
                && file.reader().range_tombstones().is_empty()
            {
                continue;
            }
            children.push(Box::new(TableIterator::new(Arc::clone(file), options.settings)));
        }
        MergingIterator::new(children)
    }

    /// Rebuild the merged source so that tables are filtered by `prefix`
    fn prepare(&mut self, prefix: Option<Vec<u8>>) {
        if self.filtered_for != prefix {
            self.inner = Self::build(&self.version, &self.options, prefix.as_deref());
            self.filtered_for = prefix;
        }
    }

    /// Prefix usable to skip tables when seeking to `target`
    fn filter_prefix_for(&self, target: &[u8]) -> Option<Vec<u8>> {
        let extractor = self.options.prefix_extractor.as_ref()?;
        if self.options.total_order_seek {
            return None;
        }
        let prefix = extractor.transform(target)?;
        if self.options.prefix_same_as_start {
            return Some(prefix.to_vec());
        }
        if self.options.auto_prefix_mode
            && prefix.len() == extractor.length()
            && let Some(upper) = &self.options.upper_bound
            && extractor.transform(upper) == Some(prefix)
        {
            return Some(prefix.to_vec());
        }
        None
    }

    fn in_prefix(&self, key: &[u8]) -> bool {
        match (&self.prefix, &self.options.prefix_extractor) {
            (Some(prefix), Some(extractor)) => extractor.transform(key) == Some(prefix.as_slice()),
            _ => true,
        }
    }

    fn below_upper(&self, key: &[u8]) -> bool {
        self.options
            .upper_bound
            .as_ref()
            .is_none_or(|upper| key < upper.as_ref())
    }

    fn below_lower(&self, key: &[u8]) -> bool {
        self.options
            .lower_bound
            .as_ref()
            .is_some_and(|lower| key < lower.as_ref())
    }

    fn pin(&self, value: Bytes) -> Bytes {
        if self.options.pin_data {
            value
        } else {
            Bytes::copy_from_slice(&value)
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.valid = false;
            self.status = Some(e.clone());
        }
        result
    }

    fn find_next_user_entry(&mut self, skip: Option<Vec<u8>>) -> Result<()> {
        self.valid = false;
        let mut skipping = skip;
        while self.inner.valid() {
            let ik = self.inner.key().clone();
            let user_key = ik.user_key();
            if ik.sequence() <= self.sequence {
                if !self.below_upper(user_key) || !self.in_prefix(user_key) {
                    return Ok(());
                }
                if skipping.as_deref() != Some(user_key) {
                    let hidden = ik.kind() == ValueKind::Deletion
                        || self.range_del.should_delete(user_key, ik.sequence());
                    if hidden {
                        skipping = Some(user_key.to_vec());
                    } else {
                        let value = self.inner.value()?;
                        self.value = self.pin(value);
                        self.key = user_key.to_vec();
                        self.valid = true;
                        return Ok(());
                    }
                }
            }
            self.inner.next()?;
        }
        Ok(())
    }

    fn find_prev_user_entry(&mut self) -> Result<()> {
        self.valid = false;
        let mut found = false;
        while self.inner.valid() {
            let ik = self.inner.key().clone();
            let user_key = ik.user_key();
            if ik.sequence() <= self.sequence && self.below_upper(user_key) {
                if found && user_key < self.key.as_slice() {
                    break;
                }
                if self.below_lower(user_key) || !self.in_prefix(user_key) {
                    break;
                }
                let hidden = ik.kind() == ValueKind::Deletion
                    || self.range_del.should_delete(user_key, ik.sequence());
                if hidden {
                    found = false;
                    self.key.clear();
                    self.value = Bytes::new();
                } else {
                    let value = self.inner.value()?;
                    self.value = self.pin(value);
                    self.key = user_key.to_vec();
                    found = true;
                }
            }
            self.inner.prev()?;
        }
        self.valid = found;
        Ok(())
    }

    fn seek_inner(&mut self, target: &[u8]) -> Result<bool> {
        let target = match &self.options.lower_bound {
            Some(lower) if target < lower.as_ref() => lower.to_vec(),
            _ => target.to_vec(),
        };
        let filter = self.filter_prefix_for(&target);
        self.prepare(filter);
        self.direction = Direction::Forward;
        self.inner.seek(&InternalKey::for_seek(&target, self.sequence))?;
        self.find_next_user_entry(None)?;
        Ok(self.valid)
    }

    fn seek_for_prev_inner(&mut self, target: &[u8]) -> Result<bool> {
        let filter = self.filter_prefix_for(target);
        self.prepare(filter);
        self.direction = Direction::Reverse;
        if self.below_lower(target) {
            self.valid = false;
            return Ok(false);
        }
        match &self.options.upper_bound {
            Some(upper) if target >= upper.as_ref() => {
                let upper = InternalKey::for_seek(upper, MAX_SEQUENCE);
                self.inner.seek_for_prev(&upper)?
            },
            _ => self.inner.seek_for_prev(&InternalKey::after_all_versions(target))?,
        };
        self.find_prev_user_entry()?;
        Ok(self.valid)
    }

    fn active_prefix_of(&self, target: &[u8]) -> Option<Vec<u8>> {
        if !self.options.prefix_same_as_start {
            return None;
        }
        let extractor = self.options.prefix_extractor.as_ref()?;
        extractor.transform(target).map(|p| p.to_vec())
    }

    pub fn seek(&mut self, target: &[u8]) -> Result<bool> {
        self.prefix = self.active_prefix_of(target);
        let result = self.seek_inner(target);
        self.track(result)
    }

    pub fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool> {
        self.prefix = self.active_prefix_of(target);
        let result = self.seek_for_prev_inner(target);
        self.track(result)
    }

    pub fn seek_to_first(&mut self) -> Result<bool> {
        self.prefix = None;
        let result = match self.options.lower_bound.clone() {
            Some(lower) => self.seek_inner(&lower),
            None => {
                self.prepare(None);
                self.direction = Direction::Forward;
                self.inner
                    .seek_to_first()
                    .and_then(|_| self.find_next_user_entry(None))
                    .map(|_| self.valid)
            },
        };
        self.track(result)
    }

    pub fn seek_to_last(&mut self) -> Result<bool> {
        self.prefix = None;
        let result = match self.options.upper_bound.clone() {
            Some(upper) => self.seek_for_prev_inner(&upper),
            None => {
                self.prepare(None);
                self.direction = Direction::Reverse;
                self.inner
                    .seek_to_last()
                    .and_then(|_| self.find_prev_user_entry())
                    .map(|_| self.valid)
            },
        };
        self.track(result)
    }

    pub fn next(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let current = self.key.clone();
        let result = if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            self.inner
                .seek(&InternalKey::after_all_versions(&current))
                .and_then(|_| self.find_next_user_entry(Some(current)))
        } else {
            self.inner
                .next()
                .and_then(|_| self.find_next_user_entry(Some(current)))
        };
        let result = result.map(|_| self.valid);
        self.track(result)
    }

    pub fn prev(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let result = if self.direction == Direction::Forward {
            // A source filtered for the seek prefix may miss keys before it.
            if self.filtered_for.is_some() && !self.options.prefix_same_as_start {
                self.prepare(None);
            }
            self.direction = Direction::Reverse;
            let before = InternalKey::for_seek(&self.key, MAX_SEQUENCE);
            self.inner
                .seek_for_prev(&before)
                .and_then(|_| self.find_prev_user_entry())
        } else {
            self.find_prev_user_entry()
        };
        let result = result.map(|_| self.valid);
        self.track(result)
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current key; empty when not valid
    pub fn key(&self) -> &[u8] {
        if self.valid { &self.key } else { &[] }
    }

    /// Current value; empty when not valid
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// First error met while iterating, if any
    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn options(&self) -> &UserIteratorOptions {
        &self.options
    }

    /// Prefix the last seek confined iteration to
    pub fn active_prefix(&self) -> Option<&[u8]> {
        self.prefix.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemTable;

    fn version() -> Arc<Version> {
        let mem = Arc::new(MemTable::new());
        mem.add(1, ValueKind::Value, b"a", b"a1");
        mem.add(2, ValueKind::Value, b"b", b"b2");
        mem.add(3, ValueKind::Value, b"c", b"c3");
        mem.add(4, ValueKind::Value, b"d", b"d4");
        mem.add(5, ValueKind::Value, b"b", b"b5");
        mem.add(6, ValueKind::Deletion, b"c", b"");
        mem.add(7, ValueKind::Value, b"e", b"e7");
        mem.delete_range(8, b"d", b"e");
        Arc::new(Version::new(mem, Vec::new()))
    }

    fn collect(iter: &mut UserIterator) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut ok = iter.seek_to_first().unwrap();
        while ok {
            out.push((
                String::from_utf8_lossy(iter.key()).into_owned(),
                String::from_utf8_lossy(iter.value()).into_owned(),
            ));
            ok = iter.next().unwrap();
        }
        out
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_latest_view() {
        let mut iter = UserIterator::new(version(), 100, UserIteratorOptions::default());
        assert_eq!(collect(&mut iter), pairs(&[("a", "a1"), ("b", "b5"), ("e", "e7")]));
    }

    #[test]
    fn test_older_sequence_view() {
        let mut iter = UserIterator::new(version(), 4, UserIteratorOptions::default());
        assert_eq!(
            collect(&mut iter),
            pairs(&[("a", "a1"), ("b", "b2"), ("c", "c3"), ("d", "d4")])
        );
    }

    #[test]
    fn test_reverse_and_direction_change() {
        let mut iter = UserIterator::new(version(), 4, UserIteratorOptions::default());
        assert!(iter.seek_to_last().unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"b");
        assert_eq!(iter.value().as_ref(), b"b2");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(!iter.next().unwrap());
        assert!(!iter.valid());
        assert!(iter.key().is_empty());
    }

    #[test]
    fn test_bounds() {
        let options = UserIteratorOptions {
            lower_bound: Some(Bytes::from_static(b"b")),
            upper_bound: Some(Bytes::from_static(b"d")),
            ..Default::default()
        };
        let mut iter = UserIterator::new(version(), 4, options);
        assert_eq!(collect(&mut iter), pairs(&[("b", "b2"), ("c", "c3")]));

        assert!(iter.seek_for_prev(b"c").unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.seek_for_prev(b"zzz").unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(!iter.seek_for_prev(b"a").unwrap());
        assert!(iter.seek(b"a").unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(!iter.prev().unwrap());
    }

    #[test]
    fn test_prefix_same_as_start() {
        let mem = Arc::new(MemTable::new());
        for (i, key) in ["aa1", "aa2", "ab1", "ab2", "b"].iter().enumerate() {
            mem.add(i as u64 + 1, ValueKind::Value, key.as_bytes(), b"v");
        }
        let options = UserIteratorOptions {
            prefix_extractor: Some(PrefixExtractor::Fixed(2)),
            prefix_same_as_start: true,
            ..Default::default()
        };
        let mut iter = UserIterator::new(Arc::new(Version::new(mem, Vec::new())), 10, options);

        assert!(iter.seek(b"ab").unwrap());
        assert_eq!(iter.active_prefix(), Some(&b"ab"[..]));
        assert_eq!(iter.key(), b"ab1");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"ab2");
        assert!(!iter.next().unwrap());

        assert!(iter.seek_for_prev(b"aa9").unwrap());
        assert_eq!(iter.key(), b"aa2");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"aa1");
        assert!(!iter.prev().unwrap());
    }
}
