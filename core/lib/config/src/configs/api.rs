use serde::{Deserialize, Serialize};

/// Configuration for the JSON-RPC / WebSocket gateway.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiConfig {
    /// Address the HTTP+WS server binds to.
    pub bind_addr: String,

    /// Timeout applied to fabric requests issued on behalf of RPC calls.
    /// Value in milliseconds.
    pub request_timeout: u64,

    /// Maximum concurrent WebSocket subscriptions per connection.
    pub max_subscriptions_per_connection: u32,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout)
    }
}

impl ApiConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            request_timeout: 5_000,
            max_subscriptions_per_connection: 16,
        }
    }
}
