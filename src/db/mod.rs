//! The database: open-time configuration, the engine core and the public
//! `Database` facade.
//!
//! ```text
//! Database (clone = shared) ──→ Arc<DbCore>
//!                                 ├─ WAL + memtables (write path)
//!                                 ├─ ColumnFamilySet (index → handle)
//!                                 ├─ snapshot registry
//!                                 ├─ LockManager
//!                                 └─ manifest, OPTIONS, LOCK
//! ```
mod bulk;
#[allow(clippy::module_inception)]
mod db;
mod db_impl;
mod options;
pub mod options_file;

pub use db::{Database, DbBuilder};
pub(crate) use db_impl::DbCore;
pub use db_impl::LOCK_FILE;
pub use options::{DbOptions, ReadOptions, WriteOptimizations, WriteOptions};
pub use options_file::{OPTIONS_FILE, OptionsFile};
