use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Transaction, TxOut, Txid};

use crate::{
    traits::BitcoinOps,
    types::{BitcoinClientResult, BitcoinError, Network},
};

/// Round-robin pool of base-chain clients. Each worker owns one RPC
/// connection; callers see a single `BitcoinOps`.
pub struct BitcoinClientPool {
    clients: Vec<Arc<dyn BitcoinOps>>,
    cursor: AtomicUsize,
}

impl BitcoinClientPool {
    pub fn new(clients: Vec<Arc<dyn BitcoinOps>>) -> BitcoinClientResult<Self> {
        if clients.is_empty() {
            return Err(BitcoinError::Other(
                "client pool requires at least one client".to_string(),
            ));
        }
        let network = clients[0].get_network();
        if clients.iter().any(|c| c.get_network() != network) {
            return Err(BitcoinError::InvalidNetwork(
                "all pooled clients must share one network".to_string(),
            ));
        }
        Ok(Self {
            clients,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn next_client(&self) -> &dyn BitcoinOps {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[index].as_ref()
    }
}

impl std::fmt::Debug for BitcoinClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinClientPool")
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[async_trait]
impl BitcoinOps for BitcoinClientPool {
    async fn fetch_block_height(&self) -> BitcoinClientResult<u64> {
        self.next_client().fetch_block_height().await
    }

    async fn fetch_block_hash(&self, block_height: u64) -> BitcoinClientResult<BlockHash> {
        self.next_client().fetch_block_hash(block_height).await
    }

    async fn fetch_block(&self, block_height: u64) -> BitcoinClientResult<Block> {
        self.next_client().fetch_block(block_height).await
    }

    async fn fetch_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinClientResult<Block> {
        self.next_client().fetch_block_by_hash(block_hash).await
    }

    async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash> {
        self.next_client().fetch_best_block_hash().await
    }

    async fn broadcast_signed_transaction(
        &self,
        signed_transaction: &str,
    ) -> BitcoinClientResult<Txid> {
        self.next_client()
            .broadcast_signed_transaction(signed_transaction)
            .await
    }

    async fn get_transaction(&self, txid: &Txid) -> BitcoinClientResult<Transaction> {
        self.next_client().get_transaction(txid).await
    }

    async fn resolve_utxo(&self, outpoint: &OutPoint) -> BitcoinClientResult<Option<TxOut>> {
        self.next_client().resolve_utxo(outpoint).await
    }

    async fn get_fee_rate(&self, conf_target: u16) -> BitcoinClientResult<u64> {
        self.next_client().get_fee_rate(conf_target).await
    }

    fn get_network(&self) -> Network {
        self.clients[0].get_network()
    }
}

#[cfg(test)]
mod tests {
    use mockall::mock;

    use super::*;

    mock! {
        Chain {}

        #[async_trait]
        impl BitcoinOps for Chain {
            async fn fetch_block_height(&self) -> BitcoinClientResult<u64>;
            async fn fetch_block_hash(&self, block_height: u64) -> BitcoinClientResult<BlockHash>;
            async fn fetch_block(&self, block_height: u64) -> BitcoinClientResult<Block>;
            async fn fetch_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinClientResult<Block>;
            async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash>;
            async fn broadcast_signed_transaction(&self, signed_transaction: &str) -> BitcoinClientResult<Txid>;
            async fn get_transaction(&self, txid: &Txid) -> BitcoinClientResult<Transaction>;
            async fn resolve_utxo(&self, outpoint: &OutPoint) -> BitcoinClientResult<Option<TxOut>>;
            async fn get_fee_rate(&self, conf_target: u16) -> BitcoinClientResult<u64>;
            fn get_network(&self) -> Network;
        }
    }

    fn mock_with_height(height: u64) -> Arc<dyn BitcoinOps> {
        let mut mock = MockChain::new();
        mock.expect_get_network().return_const(Network::Regtest);
        mock.expect_fetch_block_height()
            .returning(move || Ok(height));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn pool_round_robins_across_clients() {
        let pool =
            BitcoinClientPool::new(vec![mock_with_height(1), mock_with_height(2)]).unwrap();

        let first = pool.fetch_block_height().await.unwrap();
        let second = pool.fetch_block_height().await.unwrap();
        let third = pool.fetch_block_height().await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 1);
    }

    #[tokio::test]
    async fn empty_pool_is_rejected() {
        assert!(BitcoinClientPool::new(vec![]).is_err());
    }
}
