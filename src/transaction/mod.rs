//! Pessimistic transactions, snapshots and the key lock table.
//!
//! ```text
//! Transaction ──lock──→ LockManager   [stripe 0 | stripe 1 | ... ]
//!     │                                (cf id, key) → holders
//!     ├─ WriteBatch   (buffered writes, savepoint marks)
//!     └─ SnapshotInner (pinned read view, shared with iterators)
//! ```
mod lock_manager;
mod options;
mod snapshot;
#[allow(clippy::module_inception)]
mod transaction;
mod write_batch;

pub use lock_manager::{LockManager, LockType};
pub use options::{TransactionDbOptions, TransactionOptions};
pub use snapshot::Snapshot;
pub(crate) use snapshot::SnapshotInner;
pub use transaction::{Transaction, TransactionBuilder, TransactionState};
pub use write_batch::{WriteBatch, WriteOp};
