use std::time::Duration;

/// Database-wide lock table configuration
#[derive(Debug, Clone)]
pub struct TransactionDbOptions {
    /// Lock wait used when a transaction sets none, and by ambient writes
    pub default_lock_timeout: Duration,
    /// Number of independently locked partitions of the key lock table
    pub num_stripes: usize,
    /// Maximum number of granted key locks; 0 is unlimited
    pub max_num_locks: usize,
}

impl Default for TransactionDbOptions {
    fn default() -> Self {
        TransactionDbOptions {
            default_lock_timeout: Duration::from_secs(1),
            num_stripes: 16,
            max_num_locks: 0,
        }
    }
}

/// Per-transaction configuration
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Pin the read view when the transaction begins
    pub set_snapshot: bool,
    /// Overrides `TransactionDbOptions::default_lock_timeout`
    pub lock_timeout: Option<Duration>,
    /// After this long the transaction can no longer commit and its
    /// locks may be taken by others
    pub expiration: Option<Duration>,
}
