//! Store interface consumed by the node core.
//!
//! The production deployment backs these traits with a document database;
//! that backend lives outside this repository. `InMemoryStore` implements
//! the full surface and is what the pipeline, mempool, and consensus tests
//! run against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use opnet_basic_types::{BlockNumber, EpochNumber, H256};
use opnet_merkle::MerkleProof;
use opnet_types::{
    BlockHeader, BlockWitness, Contract, Epoch, EpochSubmission, MempoolEntry,
    OverlayTransaction, ReorgRecord, TransactionReceipt, UtxoEntry,
};

mod in_memory;

pub use in_memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transient backend failure; callers retry with backoff.
    #[error("transient store failure: {0}")]
    Transient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One persisted pointer-value revision. Rows are retained per height; the
/// set of rows for a key is the revision log the reorg unwind restores from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerValueRow {
    pub contract: H256,
    pub pointer: H256,
    pub value: H256,
    pub last_seen_at: BlockNumber,
    pub proof: MerkleProof,
}

/// Registered miner identity: a post-quantum pubkey bound to a legacy key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    pub legacy_pubkey: H256,
    pub mldsa_pubkey: Vec<u8>,
}

/// All effects of one committed block, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct BlockCommitBatch {
    pub header: Option<BlockHeader>,
    pub transactions: Vec<OverlayTransaction>,
    pub receipts: Vec<TransactionReceipt>,
    pub contracts: Vec<Contract>,
    pub utxo_inserts: Vec<UtxoEntry>,
    /// Outpoints consumed by this block; marked `deleted_at_block = height`.
    pub utxo_spends: Vec<(H256, u32)>,
    pub pointer_writes: Vec<PointerValueRow>,
    pub witnesses: Vec<BlockWitness>,
    /// Mempool ids included in this block, evicted on commit.
    pub evicted_mempool_ids: Vec<H256>,
}

/// Witness query filters exposed through the API.
#[derive(Debug, Clone, Copy, Default)]
pub struct WitnessFilter {
    pub trusted: Option<bool>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
}

/// Persistent document repositories backing the node. Writers are
/// partitioned per collection (indexer owns blocks/contracts/UTXOs/pointers,
/// consensus owns witnesses/epochs, mempool owns mempool); readers may span
/// all collections and must tolerate stale reads.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    // Blocks.
    async fn block_by_height(&self, height: BlockNumber) -> StoreResult<Option<BlockHeader>>;
    async fn block_by_hash(&self, hash: H256) -> StoreResult<Option<BlockHeader>>;
    async fn latest_block(&self) -> StoreResult<Option<BlockHeader>>;

    /// Applies every effect of one block in a single atomic write.
    async fn commit_block(&self, batch: BlockCommitBatch) -> StoreResult<()>;

    /// Removes every effect of one height, resurrecting UTXOs spent there
    /// and dropping pointer revisions written there. One atomic write per
    /// height; the reorg unwinds heights in descending order.
    async fn unwind_block(&self, height: BlockNumber) -> StoreResult<()>;

    // Transactions and receipts.
    async fn transaction_by_id(&self, txid: H256) -> StoreResult<Option<OverlayTransaction>>;
    async fn transactions_by_block(
        &self,
        height: BlockNumber,
    ) -> StoreResult<Vec<OverlayTransaction>>;
    async fn receipt_by_id(&self, txid: H256) -> StoreResult<Option<TransactionReceipt>>;

    // Contracts.
    async fn contract_by_address(&self, address: &str) -> StoreResult<Option<Contract>>;
    async fn contract_by_tweaked_key(&self, key: H256) -> StoreResult<Option<Contract>>;

    // Pointer values.
    /// Latest revision with `last_seen_at <= at`.
    async fn pointer_value_at(
        &self,
        contract: H256,
        pointer: H256,
        at: BlockNumber,
    ) -> StoreResult<Option<PointerValueRow>>;

    // UTXOs.
    async fn utxo(&self, txid: H256, vout: u32) -> StoreResult<Option<UtxoEntry>>;
    async fn live_utxos_by_address(&self, address: &str) -> StoreResult<Vec<UtxoEntry>>;
    async fn spent_utxos_by_address(&self, address: &str) -> StoreResult<Vec<UtxoEntry>>;

    // Witnesses.
    /// Inserts unless a witness for `(block_number, pubkey)` already exists.
    async fn insert_witness(&self, witness: BlockWitness) -> StoreResult<bool>;
    async fn witnesses_by_block(
        &self,
        height: BlockNumber,
        filter: WitnessFilter,
    ) -> StoreResult<Vec<BlockWitness>>;

    // Mempool.
    async fn insert_mempool_entry(&self, entry: MempoolEntry) -> StoreResult<()>;
    async fn mempool_entry(&self, id: H256) -> StoreResult<Option<MempoolEntry>>;
    async fn remove_mempool_entry(&self, id: H256) -> StoreResult<Option<MempoolEntry>>;
    async fn mempool_entries(&self) -> StoreResult<Vec<MempoolEntry>>;
    async fn mempool_entries_by_addresses(
        &self,
        addresses: &[String],
        limit: usize,
    ) -> StoreResult<Vec<MempoolEntry>>;
    async fn remove_mempool_entries_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<H256>>;

    // Epochs.
    async fn upsert_epoch(&self, epoch: Epoch) -> StoreResult<()>;
    async fn epoch_by_number(&self, number: EpochNumber) -> StoreResult<Option<Epoch>>;
    async fn epoch_by_hash(&self, hash: H256) -> StoreResult<Option<Epoch>>;
    async fn latest_epoch(&self) -> StoreResult<Option<Epoch>>;
    async fn insert_epoch_submission(&self, submission: EpochSubmission) -> StoreResult<()>;
    async fn epoch_submissions(&self, number: EpochNumber) -> StoreResult<Vec<EpochSubmission>>;
    /// Rewrites an epoch's submission set; used when winner selection
    /// settles the final statuses.
    async fn replace_epoch_submissions(
        &self,
        number: EpochNumber,
        submissions: Vec<EpochSubmission>,
    ) -> StoreResult<()>;

    // Public keys.
    async fn insert_public_key(&self, entry: PublicKeyEntry) -> StoreResult<()>;
    async fn public_key_by_legacy(&self, legacy: H256) -> StoreResult<Option<PublicKeyEntry>>;

    // Reorgs.
    async fn append_reorg(&self, record: ReorgRecord) -> StoreResult<()>;
    async fn reorgs_in_range(
        &self,
        from: Option<BlockNumber>,
        to: Option<BlockNumber>,
    ) -> StoreResult<Vec<ReorgRecord>>;
}
