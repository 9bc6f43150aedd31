//! Method-level tests of the `btc` namespace over an in-memory node.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, Network, OutPoint, Transaction, TxOut, Txid};

use opnet_basic_types::{BlockNumber, H256, U256};
use opnet_btc_client::{BitcoinClientResult, BitcoinError};
use opnet_config::{MempoolConfig, VmConfig};
use opnet_rpc_decl::{BlockTag, SimulateResponse, SubmitEpochRequest};
use opnet_storage::{BlockCommitBatch, InMemoryStore};
use opnet_types::{BlockHeader, Contract};
use opnet_vm::NoopRuntime;

use super::*;
use opnet_rpc_decl::OpnetApiServer as _;

/// Chain stub for API tests; only broadcast and UTXO resolution are
/// reachable from the methods under test.
struct StubChain;

#[async_trait]
impl BitcoinOps for StubChain {
    async fn fetch_block_height(&self) -> BitcoinClientResult<u64> {
        Ok(0)
    }
    async fn fetch_block_hash(&self, _h: u64) -> BitcoinClientResult<BlockHash> {
        Err(BitcoinError::Rpc("unsupported".into()))
    }
    async fn fetch_block(&self, _h: u64) -> BitcoinClientResult<Block> {
        Err(BitcoinError::Rpc("unsupported".into()))
    }
    async fn fetch_block_by_hash(&self, _h: &BlockHash) -> BitcoinClientResult<Block> {
        Err(BitcoinError::Rpc("unsupported".into()))
    }
    async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash> {
        Err(BitcoinError::Rpc("unsupported".into()))
    }
    async fn broadcast_signed_transaction(&self, _tx: &str) -> BitcoinClientResult<Txid> {
        Err(BitcoinError::Rpc("no peers".into()))
    }
    async fn get_transaction(&self, _txid: &Txid) -> BitcoinClientResult<Transaction> {
        Err(BitcoinError::Rpc("unsupported".into()))
    }
    async fn resolve_utxo(&self, _o: &OutPoint) -> BitcoinClientResult<Option<TxOut>> {
        Ok(None)
    }
    async fn get_fee_rate(&self, _c: u16) -> BitcoinClientResult<u64> {
        Ok(1)
    }
    fn get_network(&self) -> Network {
        Network::Regtest
    }
}

fn header_at(height: u64, hash_byte: u8) -> BlockHeader {
    BlockHeader {
        height: BlockNumber(height),
        hash: H256::repeat_byte(hash_byte),
        prev_hash: H256::zero(),
        prev_checksum: H256::zero(),
        merkle_root: H256::zero(),
        storage_root: H256::zero(),
        receipt_root: H256::zero(),
        checksum_root: H256::repeat_byte(hash_byte ^ 0xff),
        checksum_proofs: vec![],
        tx_count: 0,
        ema: 0,
        base_gas: U256::from(1_000_000u64),
        bits: 0x1d00ffff,
        nonce: 0,
        version: 2,
        size: 285,
        weight: 1140,
        stripped_size: 285,
        time: 1_700_000_000,
        median_time: 1_700_000_000,
    }
}

async fn state_with_store(store: Arc<InMemoryStore>) -> RpcState {
    let fabric = Fabric::new();
    let chain: Arc<dyn BitcoinOps> = Arc::new(StubChain);
    let mempool = Arc::new(Mempool::new(
        MempoolConfig::for_tests(),
        store.clone() as Arc<dyn Store>,
        Arc::clone(&chain),
        fabric.clone(),
    ));
    let epochs = Arc::new(EpochManager::new(store.clone() as Arc<dyn Store>, 5, true));
    let vm = Arc::new(
        VmExecutor::new(Network::Regtest, VmConfig::for_tests(), Arc::new(NoopRuntime)).unwrap(),
    );

    ApiServer::new(
        ApiConfig::for_tests(),
        ChainConfig::for_tests(),
        store as Arc<dyn Store>,
        mempool,
        epochs,
        chain,
        vm,
        fabric,
    )
    .state()
    .clone()
}

#[tokio::test]
async fn block_queries_serve_committed_headers() {
    let store = Arc::new(InMemoryStore::new());
    store
        .commit_block(BlockCommitBatch {
            header: Some(header_at(1000, 0x0a)),
            ..Default::default()
        })
        .await
        .unwrap();
    let state = state_with_store(store).await;

    assert_eq!(state.block_number().await.unwrap(), "0x3e8");

    let by_number = state
        .get_block_by_number(Some(BlockTag::Height(1000)), Some(false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_number.header.height, "0x3e8");
    assert!(by_number.transactions.is_none());

    let by_hash = state
        .get_block_header_by_hash(H256::repeat_byte(0x0a))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.hash, H256::repeat_byte(0x0a));

    // Latest sentinel resolves to the same block.
    let latest = state
        .get_block_header_by_number(Some(BlockTag::Latest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.height, "0x3e8");

    // Unknown heights are typed nulls, not errors.
    assert!(state
        .get_block_by_number(Some(BlockTag::Height(2000)), None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn chain_id_and_mempool_info() {
    let state = state_with_store(Arc::new(InMemoryStore::new())).await;
    assert_eq!(state.chain_id().await.unwrap(), "0x1");

    let info = state.get_mempool_info().await.unwrap();
    assert_eq!(info.count, 0);
    assert_eq!(info.opnet_count, 0);
}

#[tokio::test]
async fn get_code_respects_only_bytecode() {
    let store = Arc::new(InMemoryStore::new());
    store
        .commit_block(BlockCommitBatch {
            contracts: vec![Contract {
                contract_address: "bcrt1ptest".to_string(),
                tweaked_pubkey: H256::repeat_byte(2),
                deployer: H256::repeat_byte(3),
                bytecode: vec![0xde, 0xad],
                bytecode_hash: Contract::bytecode_hash_of(&[0xde, 0xad]),
                deployment_txid: H256::repeat_byte(4),
                deployment_height: BlockNumber(1),
            }],
            ..Default::default()
        })
        .await
        .unwrap();
    let state = state_with_store(store).await;

    let full = state
        .get_code("bcrt1ptest".to_string(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(full.bytecode, "0xdead");
    assert_eq!(full.contract_tweaked_public_key, Some(H256::repeat_byte(2)));

    let bare = state
        .get_code("bcrt1ptest".to_string(), Some(true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bare.bytecode, "0xdead");
    assert!(bare.contract_address.is_none());

    assert!(state
        .get_code("bcrt1punknown".to_string(), None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn send_raw_transaction_maps_admission_failures_into_response() {
    let state = state_with_store(Arc::new(InMemoryStore::new())).await;

    // Invalid hex is a validation error.
    assert!(state
        .send_raw_transaction("0xzz".to_string(), None)
        .await
        .is_err());

    // Well-formed hex that fails admission (undecodable tx) reports a
    // structured failure instead of an RPC error.
    let response = state
        .send_raw_transaction("0x0001".to_string(), None)
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn simulate_reports_missing_contract() {
    let state = state_with_store(Arc::new(InMemoryStore::new())).await;
    let response = state
        .simulate_transaction(opnet_rpc_decl::SimulateRequest {
            to: "bcrt1pnothing".to_string(),
            calldata: "0x00".to_string(),
            from: None,
            block_number: None,
        })
        .await
        .unwrap();
    assert!(matches!(response, SimulateResponse::Failure { .. }));
}

#[tokio::test]
async fn epoch_submission_with_bad_signature_is_rejected_in_band() {
    let store = Arc::new(InMemoryStore::new());
    store
        .commit_block(BlockCommitBatch {
            header: Some(header_at(0, 0x0b)),
            ..Default::default()
        })
        .await
        .unwrap();
    let state = state_with_store(store).await;

    let template = state.get_epoch_template().await.unwrap();
    let response = state
        .submit_epoch(SubmitEpochRequest {
            epoch_number: BlockTag::Height(0),
            target_hash: template.target_hash,
            salt: H256::repeat_byte(1),
            mldsa_public_key: "0xabcd".to_string(),
            legacy_public_key: H256::repeat_byte(2),
            graffiti: None,
            signature: "0x00".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, "rejected");
    assert!(response.message.is_some());
}
