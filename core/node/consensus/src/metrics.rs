//! Metrics for the consensus unit.

use vise::{Counter, Gauge, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "opnet_consensus")]
pub(super) struct ConsensusMetrics {
    /// Number of witnesses signed locally.
    pub witnesses_signed: Counter,

    /// Number of inbound witnesses recorded.
    pub witnesses_recorded: Counter,

    /// Number of witnesses rejected (bad signature, unknown block).
    pub witnesses_rejected: Counter,

    /// Number of epoch submissions accepted.
    pub submissions_accepted: Counter,

    /// Highest finalised block.
    pub finalized_height: Gauge<u64>,
}

#[vise::register]
pub(super) static METRICS: vise::Global<ConsensusMetrics> = vise::Global::new();
