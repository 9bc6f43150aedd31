use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-contract limit overrides for designated system contracts.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SpecialContractConfig {
    /// Tweaked key (hex) of the contract the overrides apply to.
    pub contract: String,

    /// Execution does not charge gas.
    pub free_gas: bool,

    /// Calls into this contract ignore the per-block gas ceiling.
    pub bypass_block_limit: bool,

    /// Cap on gas forwarded to external calls made by this contract.
    pub max_external_gas: Option<u64>,
}

/// Configuration for the contract execution sandbox.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VmConfig {
    /// Wall-clock deadline for a single top-level call. Value in
    /// milliseconds.
    pub call_timeout: u64,

    /// Maximum nested call depth.
    pub max_call_depth: u32,

    /// Limit overrides for system contracts.
    pub special_contracts: Vec<SpecialContractConfig>,
}

impl VmConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout)
    }
}

impl VmConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            call_timeout: 2_000,
            max_call_depth: 24,
            special_contracts: vec![],
        }
    }
}
