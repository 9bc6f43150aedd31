//! Environment-driven configuration assembly. Every component config reads
//! from its own `OPNET_*` prefix; unset sections fall back to localhost
//! regtest defaults.

use serde::de::DeserializeOwned;

use opnet_config::{
    ApiConfig, BtcClientConfig, ChainConfig, ConsensusConfig, IndexerConfig, MempoolConfig,
    VmConfig,
};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub chain: ChainConfig,
    pub btc_client: BtcClientConfig,
    pub indexer: IndexerConfig,
    pub mempool: MempoolConfig,
    pub consensus: ConsensusConfig,
    pub api: ApiConfig,
    pub vm: VmConfig,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            chain: section("OPNET_CHAIN_", default_chain)?,
            btc_client: section("OPNET_BTC_", default_btc_client)?,
            indexer: section("OPNET_INDEXER_", default_indexer)?,
            mempool: section("OPNET_MEMPOOL_", default_mempool)?,
            consensus: section("OPNET_CONSENSUS_", default_consensus)?,
            api: section("OPNET_API_", default_api)?,
            vm: section("OPNET_VM_", default_vm)?,
        })
    }
}

fn section<T: DeserializeOwned>(prefix: &str, fallback: fn() -> T) -> anyhow::Result<T> {
    match envy::prefixed(prefix).from_env::<T>() {
        Ok(config) => Ok(config),
        Err(envy::Error::MissingValue(_)) => Ok(fallback()),
        Err(err) => Err(anyhow::anyhow!("invalid {prefix} configuration: {err}")),
    }
}

fn default_chain() -> ChainConfig {
    ChainConfig {
        chain_id: 1,
        network: "regtest".to_string(),
    }
}

fn default_btc_client() -> BtcClientConfig {
    BtcClientConfig {
        rpc_url: "http://127.0.0.1:18443".to_string(),
        rpc_user: "opnet".to_string(),
        rpc_password: "opnet".to_string(),
        network: "regtest".to_string(),
        pool_size: 4,
    }
}

fn default_indexer() -> IndexerConfig {
    IndexerConfig {
        poll_interval: 2_000,
        start_block: 0,
        max_retries: 10,
        retry_backoff: 1_000,
    }
}

fn default_mempool() -> MempoolConfig {
    MempoolConfig {
        max_raw_tx_size: 400_000,
        max_psbt_size: 1_000_000,
        max_query_limit: 100,
        expiry: 86_400,
        sweep_interval: 60_000,
    }
}

fn default_consensus() -> ConsensusConfig {
    ConsensusConfig {
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

fn default_api() -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:9001".to_string(),
        request_timeout: 5_000,
        max_subscriptions_per_connection: 64,
    }
}

fn default_vm() -> VmConfig {
    VmConfig {
        call_timeout: 2_000,
        max_call_depth: 24,
        special_contracts: vec![],
    }
}
