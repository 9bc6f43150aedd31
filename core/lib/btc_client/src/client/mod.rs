use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Transaction, TxOut, Txid};

mod pool;
mod rpc_client;

pub use pool::BitcoinClientPool;

use crate::{
    client::rpc_client::BitcoinRpcClient,
    traits::{BitcoinOps, BitcoinRpc},
    types::{Auth, BitcoinClientResult, BitcoinError, Network},
};

/// A single connection to the base-chain node, typed for the operations the
/// core consumes.
pub struct BitcoinClient {
    rpc: Box<dyn BitcoinRpc>,
    network: Network,
}

impl BitcoinClient {
    pub fn new(rpc_url: &str, network: Network, auth: Auth) -> BitcoinClientResult<Self> {
        let rpc = Box::new(BitcoinRpcClient::new(rpc_url, auth)?);
        Ok(Self { rpc, network })
    }

    /// Wraps an already constructed transport; used by tests to substitute
    /// a mock RPC.
    pub fn from_rpc(rpc: Box<dyn BitcoinRpc>, network: Network) -> Self {
        Self { rpc, network }
    }
}

#[async_trait]
impl BitcoinOps for BitcoinClient {
    async fn fetch_block_height(&self) -> BitcoinClientResult<u64> {
        self.rpc.get_block_count().await
    }

    async fn fetch_block_hash(&self, block_height: u64) -> BitcoinClientResult<BlockHash> {
        self.rpc.get_block_hash(block_height).await
    }

    async fn fetch_block(&self, block_height: u64) -> BitcoinClientResult<Block> {
        let hash = self.rpc.get_block_hash(block_height).await?;
        self.rpc.get_block_by_hash(&hash).await
    }

    async fn fetch_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinClientResult<Block> {
        self.rpc.get_block_by_hash(block_hash).await
    }

    async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash> {
        self.rpc.get_best_block_hash().await
    }

    async fn broadcast_signed_transaction(
        &self,
        signed_transaction: &str,
    ) -> BitcoinClientResult<Txid> {
        self.rpc.send_raw_transaction(signed_transaction).await
    }

    async fn get_transaction(&self, txid: &Txid) -> BitcoinClientResult<Transaction> {
        self.rpc.get_transaction(txid).await
    }

    async fn resolve_utxo(&self, outpoint: &OutPoint) -> BitcoinClientResult<Option<TxOut>> {
        self.rpc.get_tx_out(outpoint).await
    }

    async fn get_fee_rate(&self, conf_target: u16) -> BitcoinClientResult<u64> {
        match self.rpc.estimate_smart_fee(conf_target).await? {
            Some(fee_rate) => Ok(fee_rate),
            None => Err(BitcoinError::FeeEstimationFailed(
                "node returned no fee estimate".to_string(),
            )),
        }
    }

    fn get_network(&self) -> Network {
        self.network
    }
}
