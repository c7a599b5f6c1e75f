use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::debug;

use crate::{
    column_family::ColumnFamilyHandle,
    db::{DbCore, ReadOptions, WriteOptions},
    iterator::{DbIterator, ReadContext},
    transaction::{
        LockType, TransactionOptions, WriteBatch, WriteOp, snapshot::SnapshotInner,
    },
    util::{Result, Status},
};

/// Lifecycle of a transaction. A `TransactionBuilder` is a transaction
/// that has not begun yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Configures a transaction before it begins
pub struct TransactionBuilder {
    core: Arc<DbCore>,
    write_options: WriteOptions,
    read_options: ReadOptions,
    options: TransactionOptions,
}

impl TransactionBuilder {
    pub(crate) fn new(core: Arc<DbCore>) -> Self {
        TransactionBuilder {
            core,
            write_options: WriteOptions::default(),
            read_options: ReadOptions::default(),
            options: TransactionOptions::default(),
        }
    }

    /// Pin the read view when the transaction begins
    pub fn set_snapshot(mut self, enabled: bool) -> Self {
        self.options.set_snapshot = enabled;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.write_options.sync = sync;
        self
    }

    pub fn disable_wal(mut self, disable: bool) -> Self {
        self.write_options.disable_wal = disable;
        self
    }

    pub fn no_slowdown(mut self, no_slowdown: bool) -> Self {
        self.write_options.no_slowdown = no_slowdown;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.read_options.verify_checksums = verify;
        self
    }

    pub fn fill_cache(mut self, fill: bool) -> Self {
        self.read_options.fill_cache = fill;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = Some(timeout);
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.options.expiration = Some(expiration);
        self
    }

    pub fn begin(self) -> Result<Transaction> {
        Transaction::begin(self.core, self.write_options, self.read_options, self.options)
    }
}

/// A pessimistic transaction.
///
/// Writes are buffered and become visible to others atomically on
/// `commit`. Every key written or read with `for_update` is locked until
/// the transaction ends, so two transactions never both change a key
/// unseen by the other.
///
/// With a pinned snapshot reads are repeatable, and locking a key that was
/// changed after the snapshot fails with `Conflict`. Without one, reads
/// see the latest committed state.
///
/// After `commit` or `rollback` every operation fails with `Closed`.
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    id: u64,
    core: Arc<DbCore>,
    state: TransactionState,
    write_options: WriteOptions,
    read_options: ReadOptions,
    lock_timeout: Duration,
    expires_at: Option<Instant>,
    snapshot: Option<Arc<SnapshotInner>>,
    /// Tagged with family ids
    batch: WriteBatch,
    /// Batch lengths at each savepoint
    savepoints: Vec<usize>,
    locked: HashMap<(u32, Bytes), LockType>,
}

impl Transaction {
    pub(crate) fn begin(
        core: Arc<DbCore>,
        write_options: WriteOptions,
        read_options: ReadOptions,
        options: TransactionOptions,
    ) -> Result<Self> {
        core.check_open()?;
        let snapshot = if options.set_snapshot {
            Some(SnapshotInner::register(&core)?)
        } else {
            None
        };
        let id = core.new_transaction_id();
        let lock_timeout = options
            .lock_timeout
            .unwrap_or(core.tx_options().default_lock_timeout);
        debug!(txn = id, snapshot = snapshot.as_ref().map(|s| s.sequence()), "transaction begun");
        Ok(Transaction {
            id,
            core,
            state: TransactionState::Active,
            write_options,
            read_options,
            lock_timeout,
            expires_at: options.expiration.map(|e| Instant::now() + e),
            snapshot,
            batch: WriteBatch::new(),
            savepoints: Vec::new(),
            locked: HashMap::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Sequence of the pinned read view, if any
    pub fn snapshot_sequence(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.sequence())
    }

    /// Number of buffered write operations
    pub fn num_writes(&self) -> usize {
        self.batch.count()
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Status::closed(format!(
                "Transaction {} is {:?}",
                self.id, self.state
            )));
        }
        self.core.check_open()?;
        if self.is_expired() {
            return Err(Status::timed_out(format!("Transaction {} expired", self.id)));
        }
        Ok(())
    }

    fn handle(&self, cf: usize) -> Result<ColumnFamilyHandle> {
        self.core.handle(cf)
    }

    /// Lock `key` and validate it against the pinned snapshot
    fn lock(&mut self, handle: &ColumnFamilyHandle, key: &[u8], lock_type: LockType) -> Result<()> {
        let lock_key = (handle.id(), Bytes::copy_from_slice(key));
        let held = self.locked.get(&lock_key).copied();
        if held == Some(LockType::Write) || (held.is_some() && lock_type == LockType::Read) {
            return Ok(());
        }

        self.core.locks().acquire(
            handle.id(),
            key,
            lock_type,
            self.id,
            self.lock_timeout,
            self.expires_at,
        )?;

        if let Some(snapshot) = &self.snapshot
            && let Some(latest) = self.core.latest_sequence(handle, key)?
            && latest > snapshot.sequence()
        {
            match held {
                None => self.core.locks().release(handle.id(), key, self.id),
                // An upgraded lock stays upgraded
                Some(_) => {
                    self.locked.insert(lock_key, lock_type);
                },
            }
            return Err(Status::conflict(format!(
                "Key {:?} changed after the transaction snapshot",
                String::from_utf8_lossy(key)
            )));
        }

        self.locked.insert(lock_key, lock_type);
        Ok(())
    }

    fn read(&self, handle: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(op) = self.batch.get_for_update(handle.id(), key) {
            return Ok(match op {
                WriteOp::Put { value, .. } => Some(value.clone()),
                _ => None,
            });
        }
        self.core.get(
            handle,
            key,
            self.snapshot_sequence(),
            &self.read_options,
        )
    }

    /// Read `key` seeing this transaction's own writes. With `for_update`
    /// the key is locked exclusively first.
    pub fn get(&mut self, cf: usize, key: impl AsRef<[u8]>, for_update: bool) -> Result<Option<Bytes>> {
        self.check_active()?;
        let handle = self.handle(cf)?;
        let key = key.as_ref();
        if for_update {
            self.lock(&handle, key, LockType::Write)?;
        }
        self.read(&handle, key)
    }

    pub fn get_for_update(&mut self, cf: usize, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.get(cf, key, true)
    }

    /// Read under a shared lock: other transactions may read-lock the key
    /// too, but none can write it until this one ends
    pub fn get_for_share(&mut self, cf: usize, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.check_active()?;
        let handle = self.handle(cf)?;
        let key = key.as_ref();
        self.lock(&handle, key, LockType::Read)?;
        self.read(&handle, key)
    }

    pub fn put(&mut self, cf: usize, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.check_active()?;
        let handle = self.handle(cf)?;
        let key = key.as_ref();
        self.lock(&handle, key, LockType::Write)?;
        self.batch.put(handle.id(), key, value);
        Ok(())
    }

    pub fn delete(&mut self, cf: usize, key: impl AsRef<[u8]>) -> Result<()> {
        self.check_active()?;
        let handle = self.handle(cf)?;
        let key = key.as_ref();
        self.lock(&handle, key, LockType::Write)?;
        self.batch.delete(handle.id(), key);
        Ok(())
    }

    /// Pin the read view to the current committed state. Reads already
    /// made are not revisited.
    pub fn set_snapshot(&mut self) -> Result<()> {
        self.check_active()?;
        self.snapshot = Some(SnapshotInner::register(&self.core)?);
        Ok(())
    }

    /// Go back to reading the latest committed state
    pub fn clear_snapshot(&mut self) -> Result<()> {
        self.check_active()?;
        self.snapshot = None;
        Ok(())
    }

    pub fn set_savepoint(&mut self) -> Result<()> {
        self.check_active()?;
        self.savepoints.push(self.batch.count());
        Ok(())
    }

    /// Undo every write since the last savepoint and remove it. Locks taken
    /// since then stay held.
    pub fn rollback_to_savepoint(&mut self) -> Result<()> {
        self.check_active()?;
        let mark = self
            .savepoints
            .pop()
            .ok_or_else(|| Status::not_found("No savepoint to roll back to"))?;
        self.batch.truncate(mark);
        Ok(())
    }

    /// Remove the last savepoint, keeping its writes
    pub fn pop_savepoint(&mut self) -> Result<()> {
        self.check_active()?;
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| Status::not_found("No savepoint to pop"))
    }

    /// Apply every buffered write atomically and release all locks.
    ///
    /// An expired transaction is rolled back and fails with `TimedOut`.
    pub fn commit(&mut self) -> Result<()> {
        if self.state == TransactionState::Active && self.is_expired() {
            self.finish(TransactionState::RolledBack);
            return Err(Status::timed_out(format!("Transaction {} expired", self.id)));
        }
        self.check_active()?;

        // Locks of an expired holder may have been stolen
        for (cf, key) in self.locked.keys() {
            if !self.core.locks().is_held(*cf, key, self.id) {
                return Err(Status::timed_out(format!(
                    "Transaction {} lost its lock on {:?}",
                    self.id,
                    String::from_utf8_lossy(key)
                )));
            }
        }

        let sequence = self.core.write(&self.batch, &self.write_options)?;
        debug!(txn = self.id, writes = self.batch.count(), sequence, "transaction committed");
        self.finish(TransactionState::Committed);
        Ok(())
    }

    /// Discard every buffered write and release all locks
    pub fn rollback(&mut self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Status::closed(format!(
                "Transaction {} is {:?}",
                self.id, self.state
            )));
        }
        self.finish(TransactionState::RolledBack);
        debug!(txn = self.id, "transaction rolled back");
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.batch.clear();
        self.savepoints.clear();
        self.snapshot = None;
        self.release_all_locks();
    }

    fn release_all_locks(&mut self) {
        for ((cf, key), _) in self.locked.drain() {
            self.core.locks().release(cf, &key, self.id);
        }
    }

    /// Iterator over family `cf` that sees this transaction's writes as of
    /// this call layered over its read view
    pub fn iterator(&self, cf: usize, options: ReadOptions) -> Result<DbIterator> {
        self.check_active()?;
        let handle = self.handle(cf)?;
        let context = ReadContext::Transaction {
            snapshot: self.snapshot.clone(),
            delta: self.batch.delta(handle.id()),
        };
        Ok(DbIterator::new(Arc::clone(&self.core), handle, context, options))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.finish(TransactionState::RolledBack);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("writes", &self.batch.count())
            .field("snapshot", &self.snapshot_sequence())
            .finish()
    }
}
