mod traits;
mod types;

pub mod client;
pub mod parser;
pub mod script;

pub use traits::{BitcoinOps, BitcoinRpc};
pub use types::{parse_network, Auth, BitcoinClientResult, BitcoinError, BitcoinRpcResult, Network};
