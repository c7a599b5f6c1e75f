//! An embedded key-value store with numbered column families, pessimistic
//! transactions, snapshots, bounded iterators and bulk loading.
//!
//! ```text
//! Database ──begin──→ Transaction ──iterator──→ DbIterator
//!    │  └──acquire──→ Snapshot    ──iterator──→ DbIterator
//!    │
//!    └─→ DbCore: WAL → MemTable → flush → Table files → compaction
//! ```

pub mod cache;
pub mod column_family;
pub mod compaction;
pub mod compression;
pub mod db;
pub mod filter;
pub mod import_export;
pub mod iterator;
pub mod memtable;
pub mod table;
pub mod transaction;
pub mod util;
pub mod version;
pub mod wal;

pub use column_family::{
    ColumnFamilyDescriptor, ColumnFamilyHandle, ColumnFamilyOptions, DEFAULT_COLUMN_FAMILY_NAME,
    PrefixExtractor, resolve_column_families,
};
pub use compression::CompressionType;
pub use db::{Database, DbBuilder, DbOptions, ReadOptions, WriteOptimizations, WriteOptions};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use import_export::{IngestExternalFileOptions, SstFileWriter};
pub use iterator::{DbIterator, IteratorState};
pub use transaction::{
    Snapshot, Transaction, TransactionBuilder, TransactionDbOptions, TransactionOptions,
    TransactionState, WriteBatch, WriteOp,
};
pub use util::{Code, Result, Status};
