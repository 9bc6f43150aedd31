pub use self::{
    api::ApiConfig,
    btc_client::BtcClientConfig,
    chain::ChainConfig,
    consensus::{ConsensusConfig, TrustedEntityConfig},
    indexer::IndexerConfig,
    mempool::MempoolConfig,
    vm::{SpecialContractConfig, VmConfig},
};

pub mod api;
pub mod btc_client;
pub mod chain;
pub mod consensus;
pub mod indexer;
pub mod mempool;
pub mod vm;
