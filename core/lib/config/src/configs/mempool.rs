use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for mempool admission and eviction.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MempoolConfig {
    /// Maximum raw overlay transaction size, in bytes.
    pub max_raw_tx_size: usize,

    /// Maximum PSBT size, in bytes.
    pub max_psbt_size: usize,

    /// Upper bound on `limit` parameters of mempool queries.
    pub max_query_limit: usize,

    /// Entries older than this are removed by the periodic sweep. Value in
    /// seconds.
    pub expiry: u64,

    /// How often the expiry sweep runs. Value in milliseconds.
    pub sweep_interval: u64,
}

impl MempoolConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval)
    }
}

impl MempoolConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            max_raw_tx_size: 400_000,
            max_psbt_size: 1_000_000,
            max_query_limit: 100,
            expiry: 86_400,
            sweep_interval: 1_000,
        }
    }
}
