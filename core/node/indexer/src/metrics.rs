//! Metrics for the block pipeline.

use vise::{Counter, Gauge, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "opnet_indexer")]
pub(super) struct IndexerMetrics {
    /// Number of blocks committed.
    pub blocks_committed: Counter,

    /// Number of overlay transactions executed.
    pub transactions_executed: Counter,

    /// Number of reorgs recovered.
    pub reorgs: Counter,

    /// Number of errors encountered (e.g., network failures, internal issues).
    pub errors: Counter,

    /// Last committed height.
    pub current_height: Gauge<u64>,
}

#[vise::register]
pub(super) static METRICS: vise::Global<IndexerMetrics> = vise::Global::new();
