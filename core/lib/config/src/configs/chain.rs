use serde::{Deserialize, Serialize};

/// Chain-wide identity parameters.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChainConfig {
    /// Numeric chain id exposed over `btc_chainId`.
    pub chain_id: u64,

    /// Network of the base chain.
    pub network: String,
}

impl ChainConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            chain_id: 1,
            network: "regtest".to_string(),
        }
    }
}
