/// Iterator stack of the engine.
///
/// ```text
/// DbIterator (public state machine, bounds, read context)
///     ↓
/// DeltaIterator (transaction writes layered over the base)   [transactions only]
///     ↓
/// UserIterator (sequence visibility, tombstones, bounds, prefix)
///     ↓
/// MergingIterator
///     ├─→ MemTableIterator
///     └─→ [TableIterator, TableIterator, ...]
/// ```
///
/// Everything below `UserIterator` speaks internal keys and yields every
/// version of every key; `UserIterator` collapses them to the newest
/// version visible at its read sequence.
use bytes::Bytes;

use crate::{memtable::InternalKey, util::Result};

/// Cursor over internal keys in `InternalKey` order.
///
/// Positioning calls return `Ok(true)` when the cursor landed on an entry.
/// On error the cursor becomes invalid and the error is returned.
pub trait InternalIterator: Send {
    fn seek_to_first(&mut self) -> Result<bool>;

    fn seek_to_last(&mut self) -> Result<bool>;

    /// Position at the first entry >= target
    fn seek(&mut self, target: &InternalKey) -> Result<bool>;

    /// Position at the last entry <= target
    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<bool>;

    /// Prerequisite: valid() == true
    fn next(&mut self) -> Result<bool>;

    /// Prerequisite: valid() == true
    fn prev(&mut self) -> Result<bool>;

    fn valid(&self) -> bool;

    /// Prerequisite: valid() == true
    fn key(&self) -> &InternalKey;

    /// Value of the current entry; blob references are resolved here.
    ///
    /// Prerequisite: valid() == true
    fn value(&self) -> Result<Bytes>;
}

mod db_iterator;
mod delta_iterator;
mod memtable_iterator;
mod merging_iterator;
mod table_iterator;
mod user_iterator;

pub use db_iterator::{DbIterator, IteratorState};
pub(crate) use db_iterator::ReadContext;
pub use delta_iterator::{DeltaEntry, DeltaIterator};
pub use memtable_iterator::MemTableIterator;
pub use merging_iterator::MergingIterator;
pub use table_iterator::TableIterator;
pub use user_iterator::{UserIterator, UserIteratorOptions};
