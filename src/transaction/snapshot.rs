use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    db::{DbCore, ReadOptions},
    iterator::{DbIterator, ReadContext},
    util::{Result, Status},
};

/// Registration of one read view in the database's snapshot list.
///
/// Shared by the `Snapshot` that created it and every iterator reading
/// through it; the view is unregistered when the last of them lets go.
pub(crate) struct SnapshotInner {
    sequence: u64,
    core: Arc<DbCore>,
}

impl SnapshotInner {
    pub(crate) fn register(core: &Arc<DbCore>) -> Result<Arc<SnapshotInner>> {
        let sequence = core.register_snapshot()?;
        Ok(Arc::new(SnapshotInner {
            sequence,
            core: Arc::clone(core),
        }))
    }

    #[inline]
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.core.unregister_snapshot(self.sequence);
    }
}

/// Snapshot provides a consistent point-in-time view of the database.
///
/// Reads through it ignore every write committed after it was acquired.
/// Compaction keeps the versions it can see until it is released, either
/// explicitly with `release` (exactly once) or by dropping it. Iterators
/// created from it keep the view alive past `release`.
pub struct Snapshot {
    sequence: u64,
    inner: Mutex<Option<Arc<SnapshotInner>>>,
}

impl Snapshot {
    pub(crate) fn acquire(core: &Arc<DbCore>) -> Result<Self> {
        let inner = SnapshotInner::register(core)?;
        Ok(Snapshot {
            sequence: inner.sequence(),
            inner: Mutex::new(Some(inner)),
        })
    }

    /// Sequence number the view is pinned at
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().is_none()
    }

    pub(crate) fn pin(&self) -> Result<Arc<SnapshotInner>> {
        self.inner
            .lock()
            .clone()
            .ok_or_else(|| Status::closed("Snapshot has been released"))
    }

    /// Release the view. A second call is an error.
    pub fn release(&self) -> Result<()> {
        match self.inner.lock().take() {
            Some(_) => Ok(()),
            None => Err(Status::invalid_argument("Snapshot already released")),
        }
    }

    pub fn get(&self, cf: usize, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.get_with(cf, key, &ReadOptions::default())
    }

    pub fn get_with(
        &self,
        cf: usize,
        key: impl AsRef<[u8]>,
        options: &ReadOptions,
    ) -> Result<Option<Bytes>> {
        let inner = self.pin()?;
        let handle = inner.core.handle(cf)?;
        inner
            .core
            .get(&handle, key.as_ref(), Some(inner.sequence), options)
    }

    /// Iterator over family `cf` as of this snapshot
    pub fn iterator(&self, cf: usize, options: ReadOptions) -> Result<DbIterator> {
        let inner = self.pin()?;
        let handle = inner.core.handle(cf)?;
        let core = Arc::clone(&inner.core);
        Ok(DbIterator::new(core, handle, ReadContext::Snapshot(inner), options))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence)
            .field("released", &self.is_released())
            .finish()
    }
}
