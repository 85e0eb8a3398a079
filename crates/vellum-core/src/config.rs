//! Engine configuration knobs.

use std::time::Duration;

/// Per-namespace engine configuration.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    /// Transactions at or above this step count always commit through a
    /// namespace copy.
    pub tx_size_to_always_copy: usize,
    /// Copy-commit also triggers above this step count when the live
    /// namespace is small relative to the transaction.
    pub start_copy_policy_tx_size: usize,
    /// Capacity multiplier of the copy policy.
    pub copy_policy_multiplier: usize,
    /// Idle time after the last write before index optimization runs.
    pub optimization_timeout: Duration,
    /// Worker threads building sort orders during optimization.
    pub optimization_sort_workers: usize,
    /// WAL ring capacity, in records.
    pub wal_size: usize,
    /// Server id stamped into LSNs.
    pub server_id: i16,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            tx_size_to_always_copy: 100_000,
            start_copy_policy_tx_size: 10_000,
            copy_policy_multiplier: 20,
            optimization_timeout: Duration::from_millis(800),
            optimization_sort_workers: 4,
            wal_size: 100_000,
            server_id: 0,
        }
    }
}
