use std::sync::Arc;

use bytes::Bytes;

use crate::{
    column_family::ColumnFamilyHandle,
    db::{DbCore, ReadOptions},
    iterator::{DeltaEntry, DeltaIterator, UserIterator},
    transaction::{Snapshot, SnapshotInner},
    util::{Result, Status},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Configurable; no cursor yet
    Unstarted,
    /// Positioned on an entry
    Started,
    /// Ran off the end of the range; reposition to continue
    Exhausted,
    Closed,
}

/// Where an iterator reads from
pub(crate) enum ReadContext {
    /// Committed state as of the first positioning call
    Latest,
    Snapshot(Arc<SnapshotInner>),
    /// A transaction's writes over its pinned view, or over the latest
    /// committed state
    Transaction {
        snapshot: Option<Arc<SnapshotInner>>,
        delta: Vec<DeltaEntry>,
    },
}

impl ReadContext {
    fn sequence(&self) -> Option<u64> {
        match self {
            ReadContext::Latest => None,
            ReadContext::Snapshot(s) => Some(s.sequence()),
            ReadContext::Transaction { snapshot, .. } => snapshot.as_ref().map(|s| s.sequence()),
        }
    }
}

enum Cursor {
    Base(UserIterator),
    Delta(DeltaIterator),
}

macro_rules! dispatch {
    ($cursor:expr, $it:ident => $body:expr) => {
        match $cursor {
            Cursor::Base($it) => $body,
            Cursor::Delta($it) => $body,
        }
    };
}

/// Cursor over one column family.
///
/// Configure bounds and snapshot while `Unstarted`; the first positioning
/// call builds the underlying cursor and freezes the configuration. The
/// iterator owns its bound buffers and holds the snapshot it reads through,
/// so releasing the `Snapshot` does not invalidate it.
pub struct DbIterator {
    core: Arc<DbCore>,
    handle: ColumnFamilyHandle,
    context: ReadContext,
    options: ReadOptions,
    cursor: Option<Cursor>,
    state: IteratorState,
}

impl DbIterator {
    pub(crate) fn new(
        core: Arc<DbCore>,
        handle: ColumnFamilyHandle,
        context: ReadContext,
        options: ReadOptions,
    ) -> Self {
        DbIterator {
            core,
            handle,
            context,
            options,
            cursor: None,
            state: IteratorState::Unstarted,
        }
    }

    #[inline]
    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Index of the column family this iterator reads
    pub fn column_family(&self) -> usize {
        self.handle.index()
    }

    pub fn lower_bound(&self) -> Option<&[u8]> {
        self.options.lower_bound.as_deref()
    }

    pub fn upper_bound(&self) -> Option<&[u8]> {
        self.options.upper_bound.as_deref()
    }

    fn check_configurable(&self) -> Result<()> {
        match self.state {
            IteratorState::Unstarted => Ok(()),
            IteratorState::Closed => Err(Status::closed("Iterator is closed")),
            _ => Err(Status::invalid_argument(
                "Iterator can only be configured before it is started",
            )),
        }
    }

    /// Inclusive lower bound
    pub fn set_lower_bound(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.check_configurable()?;
        self.options.lower_bound = Some(Bytes::copy_from_slice(key.as_ref()));
        Ok(())
    }

    /// Exclusive upper bound
    pub fn set_upper_bound(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.check_configurable()?;
        self.options.upper_bound = Some(Bytes::copy_from_slice(key.as_ref()));
        Ok(())
    }

    pub fn clear_bounds(&mut self) -> Result<()> {
        self.check_configurable()?;
        self.options.lower_bound = None;
        self.options.upper_bound = None;
        Ok(())
    }

    /// Read through `snapshot` instead of the latest state. Not available
    /// for transaction iterators, which read through the transaction's view.
    pub fn set_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.check_configurable()?;
        if matches!(self.context, ReadContext::Transaction { .. }) {
            return Err(Status::invalid_argument(
                "A transaction iterator reads through the transaction's snapshot",
            ));
        }
        self.context = ReadContext::Snapshot(snapshot.pin()?);
        Ok(())
    }

    fn build(&self) -> Result<Cursor> {
        let base = self
            .core
            .user_iterator(&self.handle, self.context.sequence(), &self.options)?;
        Ok(match &self.context {
            ReadContext::Transaction { delta, .. } => {
                Cursor::Delta(DeltaIterator::new(base, delta.clone()))
            },
            _ => Cursor::Base(base),
        })
    }

    /// Cursor to position, built on the first call and on every call when
    /// tailing
    fn prepare(&mut self) -> Result<&mut Cursor> {
        if self.state == IteratorState::Closed {
            return Err(Status::closed("Iterator is closed"));
        }
        self.core.check_open()?;
        if self.cursor.is_none() || self.options.tailing {
            self.cursor = Some(self.build()?);
        }
        self.cursor
            .as_mut()
            .ok_or_else(|| Status::closed("Iterator is closed"))
    }

    fn settle(&mut self, found: bool) -> bool {
        self.state = if found {
            IteratorState::Started
        } else {
            IteratorState::Exhausted
        };
        found
    }

    pub fn seek_to_first(&mut self) -> Result<bool> {
        let found = dispatch!(self.prepare()?, it => it.seek_to_first()?);
        Ok(self.settle(found))
    }

    pub fn seek_to_last(&mut self) -> Result<bool> {
        let found = dispatch!(self.prepare()?, it => it.seek_to_last()?);
        Ok(self.settle(found))
    }

    /// Position at the first key >= `key` within bounds
    pub fn seek(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let found = dispatch!(self.prepare()?, it => it.seek(key.as_ref())?);
        Ok(self.settle(found))
    }

    /// Position at the last key <= `key` within bounds
    pub fn seek_for_prev(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let found = dispatch!(self.prepare()?, it => it.seek_for_prev(key.as_ref())?);
        Ok(self.settle(found))
    }

    fn positioned(&mut self) -> Result<Option<&mut Cursor>> {
        match self.state {
            IteratorState::Closed => Err(Status::closed("Iterator is closed")),
            IteratorState::Unstarted => Err(Status::invalid_argument(
                "Iterator must be positioned with a seek first",
            )),
            IteratorState::Exhausted => Ok(None),
            IteratorState::Started => {
                self.core.check_open()?;
                Ok(self.cursor.as_mut())
            },
        }
    }

    /// Advance. Once exhausted it stays invalid until repositioned.
    pub fn next(&mut self) -> Result<bool> {
        let Some(cursor) = self.positioned()? else {
            return Ok(false);
        };
        let found = dispatch!(cursor, it => it.next()?);
        Ok(self.settle(found))
    }

    pub fn prev(&mut self) -> Result<bool> {
        let Some(cursor) = self.positioned()? else {
            return Ok(false);
        };
        let found = dispatch!(cursor, it => it.prev()?);
        Ok(self.settle(found))
    }

    pub fn is_valid(&self) -> bool {
        self.state == IteratorState::Started
            && self
                .cursor
                .as_ref()
                .is_some_and(|c| dispatch!(c, it => it.valid()))
    }

    fn current(&self) -> Result<&Cursor> {
        if self.state == IteratorState::Closed {
            return Err(Status::closed("Iterator is closed"));
        }
        match &self.cursor {
            Some(cursor) if self.is_valid() => Ok(cursor),
            _ => Err(Status::invalid_argument("Iterator is not positioned on an entry")),
        }
    }

    pub fn key(&self) -> Result<&[u8]> {
        Ok(dispatch!(self.current()?, it => it.key()))
    }

    pub fn value(&self) -> Result<Bytes> {
        Ok(match self.current()? {
            Cursor::Base(it) => it.value().clone(),
            Cursor::Delta(it) => it.value(),
        })
    }

    /// Error met while iterating, as opposed to plain exhaustion
    pub fn status(&self) -> Result<()> {
        match &self.cursor {
            Some(cursor) => dispatch!(cursor, it => it.status()),
            None => Ok(()),
        }
    }

    /// Drop the cursor and bounds and return to `Unstarted`
    pub fn reset(&mut self) -> Result<()> {
        if self.state == IteratorState::Closed {
            return Err(Status::closed("Iterator is closed"));
        }
        self.cursor = None;
        self.options.lower_bound = None;
        self.options.upper_bound = None;
        self.state = IteratorState::Unstarted;
        Ok(())
    }

    /// Release the cursor and the read view. Idempotent.
    pub fn close(&mut self) {
        self.cursor = None;
        self.context = ReadContext::Latest;
        self.state = IteratorState::Closed;
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("column_family", &self.handle.name())
            .field("state", &self.state)
            .field("sequence", &self.context.sequence())
            .finish()
    }
}
