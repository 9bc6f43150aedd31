#![allow(clippy::derive_partial_eq_without_eq)]

pub use crate::configs::{
    ApiConfig, BtcClientConfig, ChainConfig, ConsensusConfig, IndexerConfig, MempoolConfig,
    SpecialContractConfig, TrustedEntityConfig, VmConfig,
};

pub mod configs;
