use async_trait::async_trait;
use bitcoin::{Block, BlockHash, Network, OutPoint, Transaction, TxOut, Txid};
use bitcoincore_rpc::bitcoincore_rpc_json::GetBlockchainInfoResult;

use crate::types::{BitcoinClientResult, BitcoinRpcResult};

/// Typed operations the node core consumes from the base chain.
#[async_trait]
pub trait BitcoinOps: Send + Sync {
    async fn fetch_block_height(&self) -> BitcoinClientResult<u64>;
    async fn fetch_block_hash(&self, block_height: u64) -> BitcoinClientResult<BlockHash>;
    async fn fetch_block(&self, block_height: u64) -> BitcoinClientResult<Block>;
    async fn fetch_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinClientResult<Block>;
    async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash>;
    async fn broadcast_signed_transaction(
        &self,
        signed_transaction: &str,
    ) -> BitcoinClientResult<Txid>;
    async fn get_transaction(&self, txid: &Txid) -> BitcoinClientResult<Transaction>;
    /// Resolves an outpoint against the node's live UTXO set; `None` when
    /// the output is spent or unknown.
    async fn resolve_utxo(&self, outpoint: &OutPoint) -> BitcoinClientResult<Option<TxOut>>;
    /// Estimated fee rate in sat/vB for the given confirmation target.
    async fn get_fee_rate(&self, conf_target: u16) -> BitcoinClientResult<u64>;
    fn get_network(&self) -> Network;
}

impl std::fmt::Debug for dyn BitcoinOps + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinOps").finish()
    }
}

/// Low-level JSON-RPC surface of the base-chain node.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn get_block_count(&self) -> BitcoinRpcResult<u64>;
    async fn get_block_hash(&self, height: u64) -> BitcoinRpcResult<BlockHash>;
    async fn get_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinRpcResult<Block>;
    async fn get_best_block_hash(&self) -> BitcoinRpcResult<BlockHash>;
    async fn send_raw_transaction(&self, tx_hex: &str) -> BitcoinRpcResult<Txid>;
    async fn get_transaction(&self, tx_id: &Txid) -> BitcoinRpcResult<Transaction>;
    async fn get_tx_out(&self, outpoint: &OutPoint) -> BitcoinRpcResult<Option<TxOut>>;
    async fn estimate_smart_fee(&self, conf_target: u16) -> BitcoinRpcResult<Option<u64>>;
    async fn get_blockchain_info(&self) -> BitcoinRpcResult<GetBlockchainInfoResult>;
}

impl std::fmt::Debug for dyn BitcoinRpc + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinRpc").finish()
    }
}
