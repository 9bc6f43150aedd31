use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the block pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexerConfig {
    /// How often to poll the base chain for a new tip. Value in milliseconds.
    pub poll_interval: u64,

    /// Height to start indexing from when the store is empty.
    pub start_block: u64,

    /// Maximum consecutive retries for a transient chain/store failure
    /// before the pipeline escalates to fatal.
    pub max_retries: u32,

    /// Base delay between retries. Value in milliseconds; doubles per
    /// attempt.
    pub retry_backoff: u64,
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }
}

impl IndexerConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            poll_interval: 100,
            start_block: 0,
            max_retries: 3,
            retry_backoff: 10,
        }
    }
}
