pub mod bloom;

pub use bloom::BloomFilterPolicy;

/// Policy for building and probing per-table key filters
pub trait FilterPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Build a filter over `keys`
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// False means the key is definitely absent
    fn may_contain(&self, filter: &[u8], key: &[u8]) -> bool;
}
