use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::util::{Result, Status};

/// Lock type for pessimistic transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Shared; compatible with other read locks
    Read,
    /// Exclusive
    Write,
}

/// Lock entry for a key
#[derive(Debug, Clone, Copy)]
struct LockEntry {
    lock_type: LockType,
    txn_id: u64,
    /// Holders past this instant may have their lock stolen
    expires_at: Option<Instant>,
}

impl LockEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type LockKey = (u32, Bytes);

struct Stripe {
    locks: Mutex<HashMap<LockKey, Vec<LockEntry>>>,
    released: Condvar,
}

/// Key lock table shared by every transaction of a database.
///
/// Keys are spread over `num_stripes` independently locked maps; waiters
/// park on their stripe's condvar and are woken by every release on it.
pub struct LockManager {
    stripes: Vec<Stripe>,
    /// 0 is unlimited
    max_num_locks: usize,
    num_locks: AtomicUsize,
}

impl LockManager {
    pub fn new(num_stripes: usize, max_num_locks: usize) -> Self {
        let stripes = (0..num_stripes.max(1))
            .map(|_| Stripe {
                locks: Mutex::new(HashMap::new()),
                released: Condvar::new(),
            })
            .collect();
        LockManager {
            stripes,
            max_num_locks,
            num_locks: AtomicUsize::new(0),
        }
    }

    fn stripe(&self, cf_id: u32, key: &[u8]) -> &Stripe {
        let mut hasher = DefaultHasher::new();
        cf_id.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Acquire (or upgrade to) `lock_type` on `key` for `txn_id`.
    ///
    /// Blocks up to `timeout` for incompatible holders to release, then
    /// fails with `Busy`. A zero timeout fails immediately.
    pub fn acquire(
        &self,
        cf_id: u32,
        key: &[u8],
        lock_type: LockType,
        txn_id: u64,
        timeout: Duration,
        expires_at: Option<Instant>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let stripe = self.stripe(cf_id, key);
        let lock_key: LockKey = (cf_id, Bytes::copy_from_slice(key));
        let mut locks = stripe.locks.lock();

        loop {
            let now = Instant::now();
            let holders = locks.entry(lock_key.clone()).or_default();

            let before = holders.len();
            holders.retain(|e| e.txn_id == txn_id || !e.expired(now));
            self.num_locks.fetch_sub(before - holders.len(), Ordering::AcqRel);

            if let Some(pos) = holders.iter().position(|e| e.txn_id == txn_id) {
                let held = holders[pos].lock_type;
                if held == LockType::Write || lock_type == LockType::Read {
                    return Ok(());
                }
                // Upgrade: we must be the only holder
                if holders.len() == 1 {
                    holders[pos].lock_type = LockType::Write;
                    holders[pos].expires_at = expires_at;
                    return Ok(());
                }
            } else if Self::compatible(holders, lock_type) {
                if self.max_num_locks > 0
                    && self.num_locks.load(Ordering::Acquire) >= self.max_num_locks
                {
                    if holders.is_empty() {
                        locks.remove(&lock_key);
                    }
                    return Err(Status::busy(format!(
                        "Lock limit of {} reached",
                        self.max_num_locks
                    )));
                }
                holders.push(LockEntry {
                    lock_type,
                    txn_id,
                    expires_at,
                });
                self.num_locks.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }

            // Wake at the deadline or when the first holder expires
            let wake = holders
                .iter()
                .filter_map(|e| e.expires_at)
                .min()
                .map_or(deadline, |at| at.min(deadline));

            if now >= deadline {
                return Err(Status::busy(format!(
                    "Timed out waiting for lock on key {:?}",
                    String::from_utf8_lossy(key)
                )));
            }
            stripe.released.wait_until(&mut locks, wake);
        }
    }

    fn compatible(holders: &[LockEntry], lock_type: LockType) -> bool {
        match lock_type {
            LockType::Read => holders.iter().all(|e| e.lock_type == LockType::Read),
            LockType::Write => holders.is_empty(),
        }
    }

    /// Release `txn_id`'s lock on `key`, if it still holds one
    pub fn release(&self, cf_id: u32, key: &[u8], txn_id: u64) {
        let stripe = self.stripe(cf_id, key);
        let lock_key: LockKey = (cf_id, Bytes::copy_from_slice(key));
        let mut locks = stripe.locks.lock();
        if let Some(holders) = locks.get_mut(&lock_key) {
            let before = holders.len();
            holders.retain(|e| e.txn_id != txn_id);
            self.num_locks.fetch_sub(before - holders.len(), Ordering::AcqRel);
            if holders.is_empty() {
                locks.remove(&lock_key);
            }
        }
        drop(locks);
        stripe.released.notify_all();
    }

    /// Whether `txn_id` still holds a lock on `key` (it may have been stolen)
    pub fn is_held(&self, cf_id: u32, key: &[u8], txn_id: u64) -> bool {
        let stripe = self.stripe(cf_id, key);
        let lock_key: LockKey = (cf_id, Bytes::copy_from_slice(key));
        stripe
            .locks
            .lock()
            .get(&lock_key)
            .is_some_and(|holders| holders.iter().any(|e| e.txn_id == txn_id))
    }

    /// Number of granted locks across all stripes
    pub fn num_locks(&self) -> usize {
        self.num_locks.load(Ordering::Acquire)
    }
}
