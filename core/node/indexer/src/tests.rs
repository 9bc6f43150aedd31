//! End-to-end pipeline tests against a scripted base chain.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    secp256k1::{All, Secp256k1, SecretKey},
    transaction::Version,
    Amount, Block, BlockHash, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode,
    TxOut, Txid, Witness, XOnlyPublicKey,
};

use opnet_btc_client::{
    script::ContractScriptBuilder, BitcoinClientResult, BitcoinError, BitcoinOps,
};
use opnet_config::{IndexerConfig, VmConfig};
use opnet_merkle::{verify, TreeKind, EMPTY_RECEIPT_ROOT, EMPTY_STORAGE_ROOT};
use opnet_storage::InMemoryStore;
use opnet_vm::{CallContext, ContractRuntime, VmError, VmResult};

use super::*;

const START_HEIGHT: u64 = 1000;

/// In-memory base chain the pipeline syncs against. Tests mutate the block
/// list to simulate reorgs.
struct FakeChain {
    start_height: u64,
    blocks: Mutex<Vec<Block>>,
}

impl FakeChain {
    fn new(blocks: Vec<Block>) -> Self {
        Self {
            start_height: START_HEIGHT,
            blocks: Mutex::new(blocks),
        }
    }

    fn replace_from(&self, offset: usize, replacement: Vec<Block>) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks.truncate(offset);
        blocks.extend(replacement);
    }

    fn block_at(&self, height: u64) -> Option<Block> {
        let blocks = self.blocks.lock().unwrap();
        height
            .checked_sub(self.start_height)
            .and_then(|offset| blocks.get(offset as usize).cloned())
    }
}

#[async_trait]
impl BitcoinOps for FakeChain {
    async fn fetch_block_height(&self) -> BitcoinClientResult<u64> {
        let blocks = self.blocks.lock().unwrap();
        Ok(self.start_height + blocks.len() as u64 - 1)
    }

    async fn fetch_block_hash(&self, block_height: u64) -> BitcoinClientResult<BlockHash> {
        self.block_at(block_height)
            .map(|block| block.block_hash())
            .ok_or_else(|| BitcoinError::Rpc(format!("no block at {block_height}")))
    }

    async fn fetch_block(&self, block_height: u64) -> BitcoinClientResult<Block> {
        self.block_at(block_height)
            .ok_or_else(|| BitcoinError::Rpc(format!("no block at {block_height}")))
    }

    async fn fetch_block_by_hash(&self, block_hash: &BlockHash) -> BitcoinClientResult<Block> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .iter()
            .find(|block| block.block_hash() == *block_hash)
            .cloned()
            .ok_or_else(|| BitcoinError::Rpc("unknown block hash".to_string()))
    }

    async fn fetch_best_block_hash(&self) -> BitcoinClientResult<BlockHash> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks.last().expect("chain is never empty").block_hash())
    }

    async fn broadcast_signed_transaction(&self, _tx: &str) -> BitcoinClientResult<Txid> {
        Err(BitcoinError::Rpc("broadcast unsupported in tests".to_string()))
    }

    async fn get_transaction(&self, _txid: &Txid) -> BitcoinClientResult<Transaction> {
        Err(BitcoinError::Rpc("lookup unsupported in tests".to_string()))
    }

    async fn resolve_utxo(&self, _outpoint: &OutPoint) -> BitcoinClientResult<Option<TxOut>> {
        Ok(Some(TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: ScriptBuf::new(),
        }))
    }

    async fn get_fee_rate(&self, _conf_target: u16) -> BitcoinClientResult<u64> {
        Ok(1)
    }

    fn get_network(&self) -> Network {
        Network::Regtest
    }
}

/// Runtime used by pipeline tests: calldata `"fail"` stores then reverts
/// with reason `X`; any other non-empty calldata stores a marker value
/// under a pointer named by its first byte; empty calldata (constructors)
/// succeeds without effects.
struct PipelineRuntime;

impl ContractRuntime for PipelineRuntime {
    fn execute(&self, _bytecode: &[u8], ctx: &mut CallContext<'_, '_>) -> VmResult<Vec<u8>> {
        if ctx.calldata == b"fail" {
            ctx.store(H256::repeat_byte(0x66), H256::repeat_byte(0x66))?;
            return Err(VmError::Revert {
                reason: "X".to_string(),
            });
        }
        if let Some(&first) = ctx.calldata.first() {
            ctx.store(H256::repeat_byte(first), H256::repeat_byte(0x99))?;
            ctx.emit(vec![first])?;
        }
        Ok(vec![0x01])
    }
}

fn build_block(prev: BlockHash, txs: Vec<Transaction>, time: u32) -> Block {
    Block {
        header: bitcoin::block::Header {
            version: Default::default(),
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::from_raw_hash(
                bitcoin::hashes::sha256d::Hash::from_byte_array([time as u8; 32]),
            ),
            time,
            bits: Default::default(),
            nonce: 0,
        },
        txdata: txs,
    }
}

fn build_chain(lengths: &[Vec<Transaction>], time_base: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut prev = BlockHash::from_byte_array([0u8; 32]);
    for (index, txs) in lengths.iter().enumerate() {
        let block = build_block(prev, txs.clone(), time_base + index as u32);
        prev = block.block_hash();
        blocks.push(block);
    }
    blocks
}

fn keypair(byte: u8) -> (SecretKey, XOnlyPublicKey) {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
    let (xonly, _) = secret.public_key(&secp).x_only_public_key();
    (secret, xonly)
}

fn reveal_tx(
    secp: &Secp256k1<All>,
    internal_key: XOnlyPublicKey,
    leaf_script: ScriptBuf,
    outputs: Vec<TxOut>,
    prev_byte: u8,
) -> Transaction {
    let builder = bitcoin::taproot::TaprootBuilder::new()
        .add_leaf(1, leaf_script.clone())
        .unwrap()
        .add_leaf(1, ContractScriptBuilder::lock_script())
        .unwrap();
    let spend_info = builder.finalize(secp, internal_key).unwrap();
    let control_block = spend_info
        .control_block(&(leaf_script.clone(), bitcoin::taproot::LeafVersion::TapScript))
        .unwrap();

    let mut witness = Witness::new();
    witness.push([0u8; 64]);
    witness.push(leaf_script.as_bytes());
    witness.push(control_block.serialize());

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_slice(&[prev_byte; 32]).unwrap(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness,
        }],
        output: outputs,
    }
}

fn indexer_over(chain: Arc<FakeChain>, store: Arc<InMemoryStore>) -> Indexer {
    let mut config = IndexerConfig::for_tests();
    config.start_block = START_HEIGHT;
    let vm = Arc::new(
        VmExecutor::new(
            Network::Regtest,
            VmConfig::for_tests(),
            Arc::new(PipelineRuntime),
        )
        .unwrap(),
    );
    Indexer::new(
        config,
        store as Arc<dyn Store>,
        chain as Arc<dyn BitcoinOps>,
        vm,
        Fabric::new(),
        None,
    )
}

#[tokio::test]
async fn empty_blocks_commit_with_frozen_roots_and_chained_checksums() {
    let chain = Arc::new(FakeChain::new(build_chain(
        &[vec![], vec![], vec![]],
        1_700_000_000,
    )));
    let store = Arc::new(InMemoryStore::new());
    let mut indexer = indexer_over(Arc::clone(&chain), Arc::clone(&store));

    let status = indexer.catch_up(None).await.unwrap();
    assert_eq!(status.current, BlockNumber(START_HEIGHT + 2));
    assert!(!status.is_syncing);

    for height in START_HEIGHT..=START_HEIGHT + 2 {
        let header = store
            .block_by_height(BlockNumber(height))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.storage_root, *EMPTY_STORAGE_ROOT);
        assert_eq!(header.receipt_root, *EMPTY_RECEIPT_ROOT);
        assert_eq!(header.expected_checksum_root(), header.checksum_root);
        assert_eq!(header.tx_count, 0);
    }

    // Invariant: prev_checksum of H+1 equals checksum_root of H.
    for height in START_HEIGHT + 1..=START_HEIGHT + 2 {
        let header = store
            .block_by_height(BlockNumber(height))
            .await
            .unwrap()
            .unwrap();
        let parent = store
            .block_by_height(BlockNumber(height - 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.prev_checksum, parent.checksum_root);
    }
}

#[tokio::test]
async fn deployment_commits_contract_with_derived_address() {
    let secp = Secp256k1::new();
    let (_, deployer) = keypair(1);
    let (_, salt_pubkey) = keypair(2);
    let salt = H256::repeat_byte(3);
    let bytecode = vec![0xaa; 64];

    let derived = ContractScriptBuilder::derive_contract_script(
        &secp,
        &deployer,
        &salt_pubkey,
        salt,
        &bytecode,
        Network::Regtest,
    )
    .unwrap();
    let deploy_tx = reveal_tx(
        &secp,
        deployer,
        derived.leaf_script.clone(),
        vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: derived.script_pubkey.clone(),
        }],
        0x10,
    );

    let chain = Arc::new(FakeChain::new(build_chain(
        &[vec![], vec![deploy_tx.clone()]],
        1_700_000_000,
    )));
    let store = Arc::new(InMemoryStore::new());
    let mut indexer = indexer_over(Arc::clone(&chain), Arc::clone(&store));
    indexer.catch_up(None).await.unwrap();

    let contract = store
        .contract_by_address(&derived.address.to_string())
        .await
        .unwrap()
        .expect("contract row created at deployment commit");
    assert_eq!(contract.bytecode, bytecode);
    assert_eq!(contract.tweaked_pubkey, derived.tweaked_pubkey);
    assert_eq!(contract.deployment_height, BlockNumber(START_HEIGHT + 1));

    let receipt = store
        .receipt_by_id(opnet_types::txid_to_h256(deploy_tx.compute_txid()))
        .await
        .unwrap()
        .expect("deployment produces a receipt");
    assert!(receipt.revert.is_none());
}

#[tokio::test]
async fn interaction_writes_verifiable_storage_and_reverts_stay_isolated() {
    let secp = Secp256k1::new();
    let (_, deployer) = keypair(1);
    let (_, salt_pubkey) = keypair(2);
    let (_, caller) = keypair(4);
    let bytecode = vec![0xbb; 32];

    let derived = ContractScriptBuilder::derive_contract_script(
        &secp,
        &deployer,
        &salt_pubkey,
        H256::repeat_byte(3),
        &bytecode,
        Network::Regtest,
    )
    .unwrap();
    let deploy_tx = reveal_tx(
        &secp,
        deployer,
        derived.leaf_script.clone(),
        vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: derived.script_pubkey.clone(),
        }],
        0x10,
    );

    let write_leaf = ContractScriptBuilder::interaction_script(
        &caller,
        derived.tweaked_pubkey,
        100_000,
        700,
        0,
        &[0x07],
    )
    .unwrap();
    let write_tx = reveal_tx(&secp, caller, write_leaf, vec![], 0x11);

    let fail_leaf = ContractScriptBuilder::interaction_script(
        &caller,
        derived.tweaked_pubkey,
        100_000,
        800,
        0,
        b"fail",
    )
    .unwrap();
    let fail_tx = reveal_tx(&secp, caller, fail_leaf, vec![], 0x12);

    let chain = Arc::new(FakeChain::new(build_chain(
        &[
            vec![],
            vec![deploy_tx],
            vec![write_tx.clone(), fail_tx.clone()],
        ],
        1_700_000_000,
    )));
    let store = Arc::new(InMemoryStore::new());
    let mut indexer = indexer_over(Arc::clone(&chain), Arc::clone(&store));
    indexer.catch_up(None).await.unwrap();

    let interaction_height = BlockNumber(START_HEIGHT + 2);
    let header = store
        .block_by_height(interaction_height)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(header.storage_root, *EMPTY_STORAGE_ROOT);

    // The successful write is committed with a proof valid for the header's
    // storage root.
    let row = store
        .pointer_value_at(derived.tweaked_pubkey, H256::repeat_byte(0x07), interaction_height)
        .await
        .unwrap()
        .expect("write committed");
    assert_eq!(row.value, H256::repeat_byte(0x99));
    let key = commitment::storage_key(derived.tweaked_pubkey, H256::repeat_byte(0x07));
    assert!(verify(
        header.storage_root,
        TreeKind::Storage,
        &key,
        row.value.as_bytes(),
        &row.proof,
    ));

    // The reverted interaction left a receipt but no storage row.
    let fail_receipt = store
        .receipt_by_id(opnet_types::txid_to_h256(fail_tx.compute_txid()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fail_receipt.revert.as_deref(), Some("X"));
    assert!(fail_receipt.events.is_empty());
    assert!(fail_receipt.gas_used <= opnet_types::sat_to_gas(100_000, u64::MAX));
    assert!(store
        .pointer_value_at(derived.tweaked_pubkey, H256::repeat_byte(0x66), interaction_height)
        .await
        .unwrap()
        .is_none());

    // The successful receipt carries its membership proof.
    let ok_receipt = store
        .receipt_by_id(opnet_types::txid_to_h256(write_tx.compute_txid()))
        .await
        .unwrap()
        .unwrap();
    assert!(ok_receipt.revert.is_none());
    assert_eq!(ok_receipt.events.len(), 1);
}

#[tokio::test]
async fn reorg_of_depth_two_unwinds_and_resynchronises() {
    let chain = Arc::new(FakeChain::new(build_chain(
        &[vec![], vec![], vec![]],
        1_700_000_000,
    )));
    let store = Arc::new(InMemoryStore::new());
    let mut indexer = indexer_over(Arc::clone(&chain), Arc::clone(&store));
    indexer.catch_up(None).await.unwrap();

    let old_1001 = store
        .block_by_height(BlockNumber(START_HEIGHT + 1))
        .await
        .unwrap()
        .unwrap();

    // The chain now reports different 1001' and 1002', plus a new 1003'.
    let genesis_hash = chain.block_at(START_HEIGHT).unwrap().block_hash();
    let mut replacement = Vec::new();
    let mut prev = genesis_hash;
    for index in 0..3u32 {
        let block = build_block(prev, vec![], 1_800_000_000 + index);
        prev = block.block_hash();
        replacement.push(block);
    }
    chain.replace_from(1, replacement);

    // First pass detects the reorg and unwinds; subsequent passes resync.
    indexer.catch_up(None).await.unwrap();
    let status = indexer.catch_up(None).await.unwrap();
    assert_eq!(status.current, BlockNumber(START_HEIGHT + 3));
    assert!(!status.is_reorging);

    let reorgs = store.reorgs_in_range(None, None).await.unwrap();
    assert_eq!(reorgs.len(), 1);
    assert_eq!(reorgs[0].from_block, BlockNumber(START_HEIGHT));
    assert_eq!(reorgs[0].to_block, BlockNumber(START_HEIGHT + 2));

    let new_1001 = store
        .block_by_height(BlockNumber(START_HEIGHT + 1))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(new_1001.hash, old_1001.hash);
    assert_eq!(
        new_1001.hash,
        block_hash_to_h256(chain.block_at(START_HEIGHT + 1).unwrap().block_hash())
    );
    // The checksum chain is intact across the new branch.
    let new_1002 = store
        .block_by_height(BlockNumber(START_HEIGHT + 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(new_1002.prev_checksum, new_1001.checksum_root);
}

#[tokio::test]
async fn status_requests_are_served_over_the_fabric() {
    let chain = Arc::new(FakeChain::new(build_chain(&[vec![]], 1_700_000_000)));
    let store = Arc::new(InMemoryStore::new());

    let fabric = Fabric::new();
    let mut config = IndexerConfig::for_tests();
    config.start_block = START_HEIGHT;
    let vm = Arc::new(
        VmExecutor::new(
            Network::Regtest,
            VmConfig::for_tests(),
            Arc::new(PipelineRuntime),
        )
        .unwrap(),
    );
    let indexer = Indexer::new(
        config,
        store as Arc<dyn Store>,
        chain as Arc<dyn BitcoinOps>,
        vm,
        fabric.clone(),
        None,
    );

    let (stop_sender, stop_receiver) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(indexer.run(stop_receiver));

    // Wait until the pipeline reports the tip as current.
    let mut current = BlockNumber(0);
    for _ in 0..100 {
        let response = fabric
            .request(
                ThreadKind::Indexer,
                Message::CurrentIndexerBlock,
                std::time::Duration::from_secs(1),
            )
            .await
            .unwrap();
        if let ResponseData::SyncStatus(status) = response.data {
            current = status.current;
            if current == BlockNumber(START_HEIGHT) {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(current, BlockNumber(START_HEIGHT));

    let response = fabric
        .request(
            ThreadKind::Indexer,
            Message::ValidateBlockHeaders {
                from: BlockNumber(START_HEIGHT),
                to: BlockNumber(START_HEIGHT),
            },
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_matches::assert_matches!(response.data, ResponseData::HeadersValid(true));

    stop_sender.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
