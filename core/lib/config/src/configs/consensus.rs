use serde::{Deserialize, Serialize};

/// One trusted entity and the validator keys it operates.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrustedEntityConfig {
    /// Human-readable entity identifier.
    pub name: String,

    /// X-only public keys (hex) of the entity's validators.
    pub validators: Vec<String>,
}

/// Configuration for witness validation, finality, and epoch mining.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConsensusConfig {
    /// Static trusted-validator set for the configured network.
    pub entities: Vec<TrustedEntityConfig>,

    /// Minimum distinct trusted validators required to finalise a block.
    pub minimum: usize,

    /// Minimum witnesses required per transaction generation.
    pub transaction_minimum: usize,

    /// Minimum distinct entities that must be represented among the
    /// finalising validators.
    pub minimum_validator_transaction_generation: usize,

    /// Cap on validators counted towards finality per entity.
    pub maximum_validator_per_trusted_entities: usize,

    /// Secret key (hex) used to sign locally produced witnesses; absent on
    /// non-validator nodes.
    pub validator_secret_key: Option<String>,

    /// Number of base-chain heights per mining epoch.
    pub blocks_per_epoch: u64,

    /// Winner tie-break rule: when `true`, equal `matching_bits` resolve to
    /// the earliest confirmed submission.
    pub prefer_earliest_submission: bool,
}

impl ConsensusConfig {
    pub fn blocks_per_epoch(&self) -> u64 {
        self.blocks_per_epoch.max(1)
    }
}

impl ConsensusConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            entities: vec![],
            minimum: 2,
            transaction_minimum: 2,
            minimum_validator_transaction_generation: 1,
            maximum_validator_per_trusted_entities: 3,
            validator_secret_key: None,
            blocks_per_epoch: 5,
            prefer_earliest_submission: true,
        }
    }
}
