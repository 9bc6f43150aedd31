use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use bitcoincore_rpc::{
    bitcoincore_rpc_json::{EstimateMode, GetBlockchainInfoResult},
    Client, RpcApi,
};
use tracing::{debug, warn};

use crate::{
    traits::BitcoinRpc,
    types::{Auth, BitcoinRpcResult},
};

/// Total attempts per call; transient failures back off exponentially
/// between attempts, starting at `BASE_DELAY` and doubling each time.
const RPC_ATTEMPTS: u32 = 4;
const BASE_DELAY: Duration = Duration::from_millis(250);

/// One JSON-RPC connection to the base-chain node.
pub struct BitcoinRpcClient {
    client: Client,
}

impl BitcoinRpcClient {
    pub fn new(url: &str, auth: Auth) -> Result<Self, bitcoincore_rpc::Error> {
        Ok(Self {
            client: Client::new(url, auth)?,
        })
    }

    /// Runs one node call with bounded retries. `op` is the wire method
    /// name, used only for logging.
    async fn call<T, F>(&self, op: &'static str, f: F) -> BitcoinRpcResult<T>
    where
        F: Fn(&Client) -> bitcoincore_rpc::Result<T> + Send + Sync,
    {
        let mut delay = BASE_DELAY;
        for attempt in 1..=RPC_ATTEMPTS {
            match f(&self.client) {
                Ok(value) => return Ok(value),
                Err(err) if attempt == RPC_ATTEMPTS => {
                    warn!(op, attempt, "base-chain RPC failed: {err}");
                    return Err(err.into());
                }
                Err(err) => {
                    debug!(op, attempt, "base-chain RPC failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("the last attempt either returns or errors out")
    }
}

#[async_trait]
impl BitcoinRpc for BitcoinRpcClient {
    async fn get_block_count(&self) -> BitcoinRpcResult<u64> {
        self.call("getblockcount", |rpc| rpc.get_block_count()).await
    }

    async fn get_block_hash(&self, height: u64) -> BitcoinRpcResult<BlockHash> {
        self.call("getblockhash", move |rpc| rpc.get_block_hash(height))
            .await
    }

    async fn get_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinRpcResult<Block> {
        self.call("getblock", move |rpc| rpc.get_block(block_hash))
            .await
    }

    async fn get_best_block_hash(&self) -> BitcoinRpcResult<BlockHash> {
        self.call("getbestblockhash", |rpc| rpc.get_best_block_hash())
            .await
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> BitcoinRpcResult<Txid> {
        self.call("sendrawtransaction", move |rpc| {
            rpc.send_raw_transaction(tx_hex)
        })
        .await
    }

    async fn get_transaction(&self, tx_id: &Txid) -> BitcoinRpcResult<Transaction> {
        self.call("getrawtransaction", move |rpc| {
            rpc.get_raw_transaction(tx_id, None)
        })
        .await
    }

    async fn get_tx_out(&self, outpoint: &OutPoint) -> BitcoinRpcResult<Option<TxOut>> {
        let entry = self
            .call("gettxout", move |rpc| {
                rpc.get_tx_out(&outpoint.txid, outpoint.vout, Some(false))
            })
            .await?;
        Ok(entry.map(|txout| TxOut {
            value: txout.value,
            script_pubkey: ScriptBuf::from_bytes(txout.script_pub_key.hex),
        }))
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> BitcoinRpcResult<Option<u64>> {
        let estimate = self
            .call("estimatesmartfee", move |rpc| {
                rpc.estimate_smart_fee(conf_target, Some(EstimateMode::Economical))
            })
            .await?;
        Ok(estimate.fee_rate.map(|rate| rate.to_sat()))
    }

    async fn get_blockchain_info(&self) -> BitcoinRpcResult<GetBlockchainInfoResult> {
        self.call("getblockchaininfo", |rpc| rpc.get_blockchain_info())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retries_are_bounded_against_a_dead_node() {
        // Nothing listens here; every attempt fails fast with a transport
        // error and the call must give up after `RPC_ATTEMPTS`.
        let client = BitcoinRpcClient::new("http://127.0.0.1:1", Auth::None).unwrap();

        let started = std::time::Instant::now();
        let result = client.get_block_count().await;
        assert!(result.is_err());
        // Three backoff sleeps: 250 + 500 + 1000 ms, plus connect failures.
        assert!(started.elapsed() >= Duration::from_millis(1750));
    }
}
