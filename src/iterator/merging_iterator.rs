use bytes::Bytes;

use crate::{
    iterator::InternalIterator,
    memtable::{EMPTY_INTERNAL_KEY, InternalKey},
    util::{Result, Status},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges sorted child cursors into one internal-key ordered stream.
///
/// Children are scanned linearly for the smallest (forward) or largest
/// (reverse) key; there are only a handful of them (one memtable plus the
/// tables of one column family). On a direction change every non-current
/// child is repositioned relative to the current key, as LevelDB does.
///
/// When two children hold an equal internal key the lower index wins.
pub struct MergingIterator {
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(children: Vec<Box<dyn InternalIterator>>) -> Self {
        MergingIterator {
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) -> bool {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                Some(s) if self.children[s].key() <= child.key() => Some(s),
                _ => Some(i),
            };
        }
        self.current = smallest;
        smallest.is_some()
    }

    fn find_largest(&mut self) -> bool {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            largest = match largest {
                Some(l) if self.children[l].key() >= child.key() => Some(l),
                _ => Some(i),
            };
        }
        self.current = largest;
        largest.is_some()
    }

    fn fail<T>(&mut self, e: Status) -> Result<T> {
        self.current = None;
        Err(e)
    }
}

impl InternalIterator for MergingIterator {
    fn seek_to_first(&mut self) -> Result<bool> {
        for i in 0..self.children.len() {
            if let Err(e) = self.children[i].seek_to_first() {
                return self.fail(e);
            }
        }
        self.direction = Direction::Forward;
        Ok(self.find_smallest())
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        for i in 0..self.children.len() {
            if let Err(e) = self.children[i].seek_to_last() {
                return self.fail(e);
            }
        }
        self.direction = Direction::Reverse;
        Ok(self.find_largest())
    }

    fn seek(&mut self, target: &InternalKey) -> Result<bool> {
        for i in 0..self.children.len() {
            if let Err(e) = self.children[i].seek(target) {
                return self.fail(e);
            }
        }
        self.direction = Direction::Forward;
        Ok(self.find_smallest())
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool> {
        for i in 0..self.children.len() {
            if let Err(e) = self.children[i].seek_for_prev(target) {
                return self.fail(e);
            }
        }
        self.direction = Direction::Reverse;
        Ok(self.find_largest())
    }

    fn next(&mut self) -> Result<bool> {
        let Some(current) = self.current else {
            return Ok(false);
        };

        if self.direction == Direction::Reverse {
            // Every other child sits before key(); move each past it.
            let key = self.children[current].key().clone();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                let step = child.seek(&key).and_then(|valid| {
                    if valid && *child.key() == key {
                        child.next()
                    } else {
                        Ok(valid)
                    }
                });
                if let Err(e) = step {
                    return self.fail(e);
                }
            }
            self.direction = Direction::Forward;
        }

        if let Err(e) = self.children[current].next() {
            return self.fail(e);
        }
        Ok(self.find_smallest())
    }

    fn prev(&mut self) -> Result<bool> {
        let Some(current) = self.current else {
            return Ok(false);
        };

        if self.direction == Direction::Forward {
            // Every other child sits after key(); move each before it.
            let key = self.children[current].key().clone();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                let step = child.seek_for_prev(&key).and_then(|valid| {
                    if valid && *child.key() == key {
                        child.prev()
                    } else {
                        Ok(valid)
                    }
                });
                if let Err(e) = step {
                    return self.fail(e);
                }
            }
            self.direction = Direction::Reverse;
        }

        if let Err(e) = self.children[current].prev() {
            return self.fail(e);
        }
        Ok(self.find_largest())
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &InternalKey {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &EMPTY_INTERNAL_KEY,
        }
    }

    fn value(&self) -> Result<Bytes> {
        match self.current {
            Some(i) => self.children[i].value(),
            None => Ok(Bytes::new()),
        }
    }
}
