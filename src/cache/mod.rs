pub mod lru;

pub use lru::{CacheStats, LRUCache};
