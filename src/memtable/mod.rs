pub mod internal_key;
#[allow(clippy::module_inception)]
pub mod memtable;
pub mod range_del;

pub(crate) use internal_key::EMPTY_INTERNAL_KEY;
pub use internal_key::{InternalKey, MAX_SEQUENCE, ValueKind};
pub use memtable::{LookupEntry, MemTable};
pub use range_del::{RangeDelAggregator, RangeTombstone};
