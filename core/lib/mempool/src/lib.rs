//! Mempool: admission, ordering context, and eviction of pending overlay
//! transactions and PSBTs.
//!
//! Admission runs the same parser chain as the block pipeline, so an entry's
//! classification in the mempool always matches what the indexer will
//! commit. Two candidates spending the same UTXO race: the first one in
//! wins, the second is rejected during chain validation.

use std::sync::Arc;

use bitcoin::{OutPoint, Psbt, Transaction};
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use opnet_basic_types::{BlockNumber, H256};
use opnet_btc_client::{
    parser::TransactionParser, script::key_path_address, BitcoinError, BitcoinOps,
};
use opnet_config::MempoolConfig;
use opnet_fabric::{Fabric, FabricError, Message, ThreadKind};
use opnet_storage::{Store, StoreError};
use opnet_types::{h256_to_txid, txid_to_h256, MempoolEntry, OverlayTransaction, TransactionKind};

mod metrics;
mod psbt;

pub use psbt::{is_finalized, ProcessedPsbt, PsbtDispatcher, PsbtProcessor, PsbtType};

use crate::metrics::METRICS;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("payload of {size} bytes exceeds the {max}-byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("transaction {0:?} is already known")]
    Duplicate(H256),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("gas limit {0} is out of bounds")]
    GasLimitOutOfBounds(u64),

    #[error("input {txid:?}:{vout} is not a live UTXO")]
    InputNotLive { txid: H256, vout: u32 },

    #[error("psbt processing failed: {0}")]
    Psbt(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] BitcoinError),
}

/// What admission reports back to the submitter.
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub id: H256,
    pub kind: TransactionKind,
    pub psbt: bool,
    /// Set for PSBTs whose processor modified the document.
    pub modified: Option<Vec<u8>>,
    /// Finalised PSBTs (and all raw transactions) may be broadcast onward.
    pub finalized: bool,
    /// Consensus serialization of the broadcastable transaction; present
    /// exactly when `finalized` is set. For PSBTs this is the *extracted*
    /// transaction, not the submitted PSBT bytes.
    pub finalized_tx: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolInfo {
    pub count: usize,
    pub opnet_count: usize,
    pub size: usize,
}

pub struct Mempool {
    config: MempoolConfig,
    store: Arc<dyn Store>,
    btc_client: Arc<dyn BitcoinOps>,
    parser: TransactionParser,
    psbt_dispatcher: PsbtDispatcher,
    fabric: Fabric,
    /// Outpoint -> entry id claiming it; first spender wins.
    spent_index: DashMap<(H256, u32), H256>,
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("network", &self.parser.network())
            .finish()
    }
}

impl Mempool {
    pub fn new(
        config: MempoolConfig,
        store: Arc<dyn Store>,
        btc_client: Arc<dyn BitcoinOps>,
        fabric: Fabric,
    ) -> Self {
        let parser = TransactionParser::new(btc_client.get_network());
        Self {
            config,
            store,
            btc_client,
            parser,
            psbt_dispatcher: PsbtDispatcher::new(),
            fabric,
            spent_index: DashMap::new(),
        }
    }

    pub fn register_psbt_processor(&mut self, processor: Box<dyn PsbtProcessor>) {
        self.psbt_dispatcher.register(processor);
    }

    /// Admits a raw overlay transaction.
    #[instrument(skip(self, raw), target = "mempool")]
    pub async fn submit_raw(&self, raw: Vec<u8>) -> Result<AdmissionOutcome, AdmissionError> {
        if raw.len() > self.config.max_raw_tx_size {
            METRICS.rejected.inc();
            return Err(AdmissionError::TooLarge {
                size: raw.len(),
                max: self.config.max_raw_tx_size,
            });
        }

        let tx: Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| AdmissionError::Malformed(e.to_string()))?;

        let outcome = self.admit(&tx, raw, false, None).await;
        if outcome.is_err() {
            METRICS.rejected.inc();
        }
        outcome
    }

    /// Admits a PSBT, dispatching it to the processor registered for its
    /// type. Only finalised PSBTs are flagged for onward broadcast.
    #[instrument(skip(self, raw), target = "mempool")]
    pub async fn submit_psbt(&self, raw: Vec<u8>) -> Result<AdmissionOutcome, AdmissionError> {
        if raw.len() > self.config.max_psbt_size {
            METRICS.rejected.inc();
            return Err(AdmissionError::TooLarge {
                size: raw.len(),
                max: self.config.max_psbt_size,
            });
        }

        let psbt =
            Psbt::deserialize(&raw).map_err(|e| AdmissionError::Malformed(e.to_string()))?;
        let processed = self
            .psbt_dispatcher
            .process(PsbtType::Plain, psbt)
            .map_err(|e| AdmissionError::Psbt(e.to_string()))?;

        let modified = processed
            .modified
            .then(|| processed.psbt.serialize());

        // A finalised PSBT classifies and broadcasts by its extracted
        // transaction (the witnesses live in the PSBT inputs, not the
        // unsigned tx). Fee sanity is the base chain's call to make; input
        // liveness is checked below either way.
        let finalized = processed.finalized;
        let tx = if finalized {
            processed.psbt.clone().extract_tx_unchecked_fee_rate()
        } else {
            processed.psbt.unsigned_tx.clone()
        };

        match self.admit(&tx, raw, true, modified).await {
            Ok(mut admitted) => {
                admitted.finalized = finalized;
                admitted.finalized_tx = finalized.then(|| bitcoin::consensus::serialize(&tx));
                Ok(admitted)
            }
            Err(err) => {
                METRICS.rejected.inc();
                Err(err)
            }
        }
    }

    async fn admit(
        &self,
        tx: &Transaction,
        raw: Vec<u8>,
        is_psbt: bool,
        modified: Option<Vec<u8>>,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let id = txid_to_h256(tx.compute_txid());

        // Dedup against both the mempool and the committed chain.
        if self.store.mempool_entry(id).await?.is_some()
            || self.store.transaction_by_id(id).await?.is_some()
        {
            return Err(AdmissionError::Duplicate(id));
        }

        let next_height = self
            .store
            .latest_block()
            .await?
            .map(|header| header.height.next())
            .unwrap_or(BlockNumber(0));
        let classified = self.parser.parse_transaction(tx, next_height);

        self.validate_static(&classified)?;
        self.validate_inputs(id, tx, is_psbt).await?;

        // Raw submissions are broadcastable as received; finalised PSBTs
        // get their extracted bytes attached by the caller.
        let finalized_tx = (!is_psbt).then(|| raw.clone());
        let entry = self.build_entry(id, &classified, raw, is_psbt);
        for input in &tx.input {
            self.spent_index.insert(
                (
                    txid_to_h256(input.previous_output.txid),
                    input.previous_output.vout,
                ),
                id,
            );
        }
        self.store.insert_mempool_entry(entry).await?;
        METRICS.admitted.inc();
        if let Ok(info) = self.get_info().await {
            METRICS.entries.set(info.count as u64);
        }

        for target in [ThreadKind::Indexer, ThreadKind::Api] {
            match self
                .fabric
                .notify(target, Message::MempoolTransactionNotification { id })
            {
                Ok(()) | Err(FabricError::Unlinked(_)) => {}
                Err(e) => warn!("failed to notify {target:?} of mempool admission: {e}"),
            }
        }
        info!(?id, kind = ?classified.kind(), "admitted transaction");

        Ok(AdmissionOutcome {
            id,
            kind: classified.kind(),
            psbt: is_psbt,
            modified,
            finalized: !is_psbt,
            finalized_tx,
        })
    }

    fn validate_static(&self, classified: &OverlayTransaction) -> Result<(), AdmissionError> {
        if let OverlayTransaction::Interaction(interaction) = classified {
            if interaction.theoretical_gas_limit == 0
                || interaction.theoretical_gas_limit > opnet_types::MAX_GAS_PER_TX
            {
                return Err(AdmissionError::GasLimitOutOfBounds(
                    interaction.theoretical_gas_limit,
                ));
            }
        }
        Ok(())
    }

    /// All inputs must resolve to live UTXOs at the current tip, and no
    /// other pending entry may already claim them.
    async fn validate_inputs(
        &self,
        id: H256,
        tx: &Transaction,
        is_psbt: bool,
    ) -> Result<(), AdmissionError> {
        for input in &tx.input {
            let prev_txid = txid_to_h256(input.previous_output.txid);
            let vout = input.previous_output.vout;

            if let Some(claim) = self.spent_index.get(&((prev_txid, vout))) {
                let claimant = *claim.value();
                drop(claim);
                if claimant != id {
                    // Lazily drop stale claims whose entry is gone.
                    if self.store.mempool_entry(claimant).await?.is_some() {
                        return Err(AdmissionError::InputNotLive {
                            txid: prev_txid,
                            vout,
                        });
                    }
                    self.spent_index.remove(&(prev_txid, vout));
                }
            }

            match self.store.utxo(prev_txid, vout).await? {
                Some(utxo) if utxo.is_live() => continue,
                Some(_) => {
                    return Err(AdmissionError::InputNotLive {
                        txid: prev_txid,
                        vout,
                    })
                }
                None => {
                    // Not yet indexed locally; fall back to the base chain.
                    // Unsigned PSBT inputs are still validated the same way.
                    let outpoint = OutPoint {
                        txid: h256_to_txid(prev_txid),
                        vout,
                    };
                    if self.btc_client.resolve_utxo(&outpoint).await?.is_none() {
                        debug!(?outpoint, is_psbt, "input not found in chain UTXO set");
                        return Err(AdmissionError::InputNotLive {
                            txid: prev_txid,
                            vout,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn build_entry(
        &self,
        id: H256,
        classified: &OverlayTransaction,
        raw: Vec<u8>,
        is_psbt: bool,
    ) -> MempoolEntry {
        let base = classified.base();
        let network = self.parser.network();

        let (from, contract_address, calldata, bytecode, priority_fee, gas_limit) =
            match classified {
                OverlayTransaction::Generic(_) => (None, None, None, None, 0, 0),
                OverlayTransaction::Deployment(deployment) => (
                    key_path_address(deployment.deployer_pubkey, network)
                        .ok()
                        .map(|a| a.to_string()),
                    Some(deployment.contract_address.clone()),
                    None,
                    Some(deployment.bytecode.clone()),
                    0,
                    0,
                ),
                OverlayTransaction::Interaction(interaction) => (
                    key_path_address(interaction.from_pubkey, network)
                        .ok()
                        .map(|a| a.to_string()),
                    Some(interaction.contract_address.clone()),
                    Some(interaction.calldata.clone()),
                    None,
                    interaction.priority_fee,
                    interaction.theoretical_gas_limit,
                ),
            };

        MempoolEntry {
            id,
            first_seen: Utc::now(),
            psbt: is_psbt,
            inputs: base.inputs.clone(),
            outputs: base.outputs.clone(),
            raw,
            priority_fee,
            theoretical_gas_limit: gas_limit,
            kind: classified.kind(),
            from,
            contract_address,
            calldata,
            bytecode,
        }
    }

    pub async fn get_pending(&self, id: H256) -> Result<Option<MempoolEntry>, AdmissionError> {
        Ok(self.store.mempool_entry(id).await?)
    }

    pub async fn get_latest(
        &self,
        addresses: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<MempoolEntry>, AdmissionError> {
        let limit = limit
            .unwrap_or(self.config.max_query_limit)
            .min(self.config.max_query_limit);
        Ok(self
            .store
            .mempool_entries_by_addresses(addresses, limit)
            .await?)
    }

    pub async fn get_info(&self) -> Result<MempoolInfo, AdmissionError> {
        let entries = self.store.mempool_entries().await?;
        Ok(MempoolInfo {
            count: entries.len(),
            opnet_count: entries
                .iter()
                .filter(|entry| entry.kind != TransactionKind::Generic)
                .count(),
            size: entries.iter().map(MempoolEntry::byte_size).sum(),
        })
    }

    /// Re-admits transactions unwound by a reorg.
    pub async fn restore_transactions(&self, transactions: Vec<OverlayTransaction>) {
        for tx in transactions {
            let raw = tx.base().raw.clone();
            if raw.is_empty() {
                continue;
            }
            match self.submit_raw(raw).await {
                Ok(outcome) => debug!(id = ?outcome.id, "restored transaction after reorg"),
                Err(e) => debug!("could not restore transaction after reorg: {e}"),
            }
        }
    }

    /// Periodic expiry sweep.
    pub async fn run_sweeper(
        self: Arc<Self>,
        mut stop_receiver: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut timer = tokio::time::interval(self.config.sweep_interval());

        while !*stop_receiver.borrow_and_update() {
            tokio::select! {
                _ = timer.tick() => { /* continue iterations */ }
                _ = stop_receiver.changed() => break,
            }

            let cutoff = Utc::now()
                - chrono::Duration::from_std(self.config.expiry())
                    .unwrap_or_else(|_| chrono::Duration::hours(24));
            match self.store.remove_mempool_entries_before(cutoff).await {
                Ok(expired) => {
                    if !expired.is_empty() {
                        info!(count = expired.len(), "swept expired mempool entries");
                        METRICS.swept.inc_by(expired.len() as u64);
                        self.spent_index
                            .retain(|_, claimant| !expired.contains(claimant));
                    }
                }
                Err(e) => warn!("mempool sweep failed: {e}"),
            }
        }

        info!("Stop signal received, mempool sweeper is shutting down");
        Ok(())
    }
}
