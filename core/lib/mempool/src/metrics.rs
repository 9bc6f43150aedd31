//! Metrics for the mempool.

use vise::{Counter, Gauge, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "opnet_mempool")]
pub(super) struct MempoolMetrics {
    /// Number of admitted transactions.
    pub admitted: Counter,

    /// Number of rejected candidates.
    pub rejected: Counter,

    /// Number of entries evicted by the expiry sweep.
    pub swept: Counter,

    /// Current entry count.
    pub entries: Gauge<u64>,
}

#[vise::register]
pub(super) static METRICS: vise::Global<MempoolMetrics> = vise::Global::new();
