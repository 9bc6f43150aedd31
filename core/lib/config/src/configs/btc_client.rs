use serde::{Deserialize, Serialize};

/// Configuration for the Bitcoin RPC client pool.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BtcClientConfig {
    /// URL of the Bitcoin node RPC.
    pub rpc_url: String,

    /// Username for the Bitcoin node RPC.
    pub rpc_user: String,

    /// Password for the Bitcoin node RPC.
    pub rpc_password: String,

    /// Network of the Bitcoin node.
    pub network: String,

    /// Number of pooled RPC clients.
    pub pool_size: usize,
}

impl BtcClientConfig {
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}

impl BtcClientConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            rpc_url: "http://localhost:18332".to_string(),
            rpc_user: "".to_string(),
            rpc_password: "".to_string(),
            network: "regtest".to_string(),
            pool_size: 2,
        }
    }
}
