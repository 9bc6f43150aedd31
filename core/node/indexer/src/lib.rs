//! Orchestrator of the block pipeline: follows the base-chain tip, fetches
//! and classifies blocks, executes overlay transactions, commits state with
//! Merkle commitments, detects and recovers reorgs, and reports progress to
//! the other units over the fabric.

use std::sync::Arc;

use anyhow::Context as _;
use bitcoin::Block;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use opnet_basic_types::{BlockNumber, H256, U256};
use opnet_btc_client::{parser::TransactionParser, BitcoinOps};
use opnet_config::IndexerConfig;
use opnet_fabric::{
    Envelope, Fabric, FabricError, Message, Port, ResponseData, ThreadKind, ThreadResponse,
};
use opnet_mempool::Mempool;
use opnet_storage::{BlockCommitBatch, Store};
use opnet_types::{
    block_hash_to_h256, txid_to_h256, BlockHeader, OverlayTransaction, SyncStatus, UtxoEntry,
    SAT_TO_GAS_RATIO,
};
use opnet_vm::VmExecutor;

pub mod commitment;
pub mod execution;
mod metrics;
mod reorg;
pub mod sort;
#[cfg(test)]
mod tests;

use crate::metrics::METRICS;

/// Heights processed per loop iteration before yielding back to the
/// select loop; keeps status requests responsive and gives reorgs a safe
/// cancellation point between blocks.
const MAX_BLOCKS_PER_ITERATION: u64 = 32;

/// EMA smoothing factor denominator for the per-block fee average.
const EMA_SMOOTHING: u128 = 16;

#[derive(Debug)]
enum BlockOutcome {
    Committed,
    ReorgDetected,
}

pub struct Indexer {
    config: IndexerConfig,
    store: Arc<dyn Store>,
    btc_client: Arc<dyn BitcoinOps>,
    parser: TransactionParser,
    vm: Arc<VmExecutor>,
    fabric: Fabric,
    port: Port,
    mempool: Option<Arc<Mempool>>,
    status: SyncStatus,
    started: bool,
    consecutive_failures: u32,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("status", &self.status)
            .field("started", &self.started)
            .finish()
    }
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        store: Arc<dyn Store>,
        btc_client: Arc<dyn BitcoinOps>,
        vm: Arc<VmExecutor>,
        fabric: Fabric,
        mempool: Option<Arc<Mempool>>,
    ) -> Self {
        let parser = TransactionParser::new(btc_client.get_network());
        let port = fabric.register(ThreadKind::Indexer, 0);
        Self {
            config,
            store,
            btc_client,
            parser,
            vm,
            fabric,
            port,
            mempool,
            status: SyncStatus::synced_at(BlockNumber(0), H256::zero()),
            started: false,
            consecutive_failures: 0,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Starts (or resumes) catching up with the chain tip and returns the
    /// progress after one pipeline iteration.
    pub async fn catch_up(
        &mut self,
        start_height: Option<BlockNumber>,
    ) -> anyhow::Result<SyncStatus> {
        if let Some(start) = start_height {
            self.config.start_block = start.0;
        }
        self.started = true;
        self.loop_iteration().await?;
        Ok(self.status)
    }

    /// Reacts to a new-tip notification from the chain tap.
    pub async fn handle_new_tip(
        &mut self,
        height: BlockNumber,
        hash: H256,
    ) -> anyhow::Result<()> {
        debug!(%height, ?hash, "new base-chain tip");
        self.status.target = height;
        self.status.is_syncing = self.status.current < height;
        if self.started {
            self.loop_iteration().await?;
        }
        Ok(())
    }

    pub async fn run(mut self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut timer = tokio::time::interval(self.config.poll_interval());
        self.started = true;

        while !*stop_receiver.borrow_and_update() {
            tokio::select! {
                _ = timer.tick() => {
                    match self.loop_iteration().await {
                        Ok(()) => {
                            self.consecutive_failures = 0;
                        }
                        Err(err) => {
                            METRICS.errors.inc();
                            self.consecutive_failures += 1;
                            if self.consecutive_failures > self.config.max_retries {
                                error!("block pipeline failed permanently: {err:?}");
                                return Err(err);
                            }
                            warn!(
                                failures = self.consecutive_failures,
                                "pipeline iteration failed, backing off: {err}"
                            );
                            tokio::time::sleep(
                                self.config.retry_backoff() * self.consecutive_failures,
                            )
                            .await;
                        }
                    }
                }
                envelope = self.port.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_envelope(envelope).await,
                        None => break,
                    }
                }
                _ = stop_receiver.changed() => break,
            }
        }

        info!("Stop signal received, indexer is shutting down");
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Request {
                message, reply, ..
            } => {
                let data = match message {
                    Message::CurrentIndexerBlock => ResponseData::SyncStatus(self.status),
                    Message::StartIndexer => {
                        self.started = true;
                        ResponseData::Started(true)
                    }
                    Message::ValidateBlockHeaders { from, to } => {
                        ResponseData::HeadersValid(
                            self.validate_headers(from, to).await.unwrap_or(false),
                        )
                    }
                    other => {
                        debug!("unsupported request: {other:?}");
                        ResponseData::None
                    }
                };
                reply.respond(ThreadResponse { data });
            }
            Envelope::Notification { message } => match message {
                Message::MempoolTransactionNotification { id } => {
                    debug!(?id, "pending transaction announced");
                }
                Message::StartIndexer => self.started = true,
                other => debug!("ignoring notification: {other:?}"),
            },
        }
    }

    /// Verifies the checksum chain over a committed span of headers.
    async fn validate_headers(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> anyhow::Result<bool> {
        let mut prev_checksum: Option<H256> = None;
        let mut height = from;
        while height <= to {
            let Some(header) = self.store.block_by_height(height).await? else {
                return Ok(false);
            };
            if header.expected_checksum_root() != header.checksum_root {
                return Ok(false);
            }
            if let Some(prev_checksum) = prev_checksum {
                if header.prev_checksum != prev_checksum {
                    return Ok(false);
                }
            }
            prev_checksum = Some(header.checksum_root);
            height = height.next();
        }
        Ok(true)
    }

    async fn loop_iteration(&mut self) -> anyhow::Result<()> {
        if !self.started {
            return Ok(());
        }

        let target = BlockNumber(self.btc_client.fetch_block_height().await?);
        let local = self.store.latest_block().await?;
        let mut next = match &local {
            Some(header) => header.height.next(),
            None => BlockNumber(self.config.start_block),
        };
        self.status.target = target;
        self.status.is_syncing = next <= target;

        let mut processed = 0u64;
        while next <= target && processed < MAX_BLOCKS_PER_ITERATION {
            match self.process_block(next).await? {
                BlockOutcome::Committed => {
                    next = next.next();
                    processed += 1;
                }
                BlockOutcome::ReorgDetected => {
                    self.recover_from_reorg().await?;
                    // Resume from the divergence point on the next pass.
                    return Ok(());
                }
            }
        }

        self.status.is_syncing = next <= target;
        Ok(())
    }

    #[instrument(skip(self), target = "indexer::pipeline")]
    async fn process_block(&mut self, height: BlockNumber) -> anyhow::Result<BlockOutcome> {
        let chain_hash = self.btc_client.fetch_block_hash(height.0).await?;
        let block = self.btc_client.fetch_block_by_hash(&chain_hash).await?;
        let block_hash = block_hash_to_h256(chain_hash);

        // Reorg check against the locally committed parent.
        let prev_header = match height.prev() {
            Some(prev_height) => self.store.block_by_height(prev_height).await?,
            None => None,
        };
        if let Some(prev_header) = &prev_header {
            if block_hash_to_h256(block.header.prev_blockhash) != prev_header.hash {
                warn!(%height, "parent hash mismatch; reorg detected");
                return Ok(BlockOutcome::ReorgDetected);
            }
        }

        // Classify every transaction; only non-generic ones execute.
        let overlay: Vec<OverlayTransaction> = block
            .txdata
            .iter()
            .map(|tx| self.parser.parse_transaction(tx, height))
            .collect();
        let executable: Vec<OverlayTransaction> = overlay
            .iter()
            .filter(|tx| tx.is_executable())
            .cloned()
            .collect();
        let ordered = sort::sort_transactions(executable);

        let mut exec_output = execution::execute_block(
            Arc::clone(&self.store),
            &self.vm,
            height,
            &ordered,
        );
        METRICS
            .transactions_executed
            .inc_by(exec_output.receipts.len() as u64);
        let receipts = std::mem::take(&mut exec_output.receipts);

        let prev_checksum = prev_header
            .as_ref()
            .map(|header| header.checksum_root)
            .unwrap_or_else(H256::zero);
        let merkle_root = H256::from_slice(
            &bitcoin::hashes::Hash::to_byte_array(block.header.merkle_root.to_raw_hash()),
        );
        let commitment = commitment::commit_block_state(
            height,
            block_hash,
            prev_checksum,
            merkle_root,
            &exec_output.pointer_writes,
            receipts,
        );

        let header = self.build_header(
            height,
            block_hash,
            &block,
            prev_header.as_ref(),
            &commitment,
            &exec_output,
        ).await?;
        let checksum_root = header.checksum_root;

        let (utxo_inserts, utxo_spends, evicted) = self.utxo_effects(&block, height);

        let batch = BlockCommitBatch {
            header: Some(header),
            transactions: overlay,
            receipts: commitment.receipts,
            contracts: exec_output.new_contracts,
            utxo_inserts,
            utxo_spends,
            pointer_writes: commitment.pointer_rows,
            witnesses: Vec::new(),
            evicted_mempool_ids: evicted,
        };
        self.store
            .commit_block(batch)
            .await
            .with_context(|| format!("failed to commit block {height}"))?;

        METRICS.blocks_committed.inc();
        METRICS.current_height.set(height.0);
        self.status.current = height;
        self.status.best_hash = block_hash;
        self.status.is_reorging = false;

        for target in [ThreadKind::Consensus, ThreadKind::Api] {
            match self.fabric.notify(
                target,
                Message::BlockProcessed {
                    height,
                    block_hash,
                    checksum_root,
                },
            ) {
                Ok(()) | Err(FabricError::Unlinked(_)) => {}
                Err(e) => warn!("failed to announce processed block: {e}"),
            }
        }

        info!(%height, "committed block");
        Ok(BlockOutcome::Committed)
    }

    async fn build_header(
        &self,
        height: BlockNumber,
        block_hash: H256,
        block: &Block,
        prev_header: Option<&BlockHeader>,
        commitment: &commitment::BlockCommitment,
        exec_output: &execution::BlockExecutionOutput,
    ) -> anyhow::Result<BlockHeader> {
        let prev_ema = prev_header.map(|header| header.ema).unwrap_or_default();
        // Exponential moving average over the per-block burned fees.
        let ema = prev_ema - prev_ema / EMA_SMOOTHING
            + exec_output.total_priority_fee / EMA_SMOOTHING;
        let base_gas = U256::from(ema.max(u128::from(SAT_TO_GAS_RATIO)));

        Ok(BlockHeader {
            height,
            hash: block_hash,
            prev_hash: block_hash_to_h256(block.header.prev_blockhash),
            prev_checksum: prev_header
                .map(|header| header.checksum_root)
                .unwrap_or_else(H256::zero),
            merkle_root: H256::from_slice(&bitcoin::hashes::Hash::to_byte_array(
                block.header.merkle_root.to_raw_hash(),
            )),
            storage_root: commitment.storage_root,
            receipt_root: commitment.receipt_root,
            checksum_root: commitment.checksum_root,
            checksum_proofs: commitment.checksum_proofs.clone(),
            tx_count: block.txdata.len() as u32,
            ema,
            base_gas,
            bits: block.header.bits.to_consensus(),
            nonce: block.header.nonce,
            version: block.header.version.to_consensus(),
            size: block.total_size() as u64,
            weight: block.weight().to_wu(),
            stripped_size: (block.weight().to_wu() - block.total_size() as u64) / 3,
            time: block.header.time,
            median_time: self.median_time_past(height, block.header.time).await?,
        })
    }

    /// Median of the last 11 block times, matching base-chain MTP.
    async fn median_time_past(&self, height: BlockNumber, time: u32) -> anyhow::Result<u32> {
        let mut times = vec![time];
        let mut cursor = height.prev();
        while let Some(h) = cursor {
            if times.len() == 11 {
                break;
            }
            match self.store.block_by_height(h).await? {
                Some(header) => times.push(header.time),
                None => break,
            }
            cursor = h.prev();
        }
        times.sort_unstable();
        Ok(times[times.len() / 2])
    }

    fn utxo_effects(
        &self,
        block: &Block,
        height: BlockNumber,
    ) -> (Vec<UtxoEntry>, Vec<(H256, u32)>, Vec<H256>) {
        let mut inserts = Vec::new();
        let mut spends = Vec::new();
        let mut txids = Vec::with_capacity(block.txdata.len());

        for tx in &block.txdata {
            let txid = txid_to_h256(tx.compute_txid());
            txids.push(txid);

            for input in &tx.input {
                if input.previous_output.is_null() {
                    continue;
                }
                spends.push((
                    txid_to_h256(input.previous_output.txid),
                    input.previous_output.vout,
                ));
            }

            for (vout, output) in tx.output.iter().enumerate() {
                if output.script_pubkey.is_op_return() {
                    continue;
                }
                inserts.push(UtxoEntry {
                    txid,
                    vout: vout as u32,
                    value: output.value.to_sat(),
                    script_pubkey: output.script_pubkey.to_bytes(),
                    address: bitcoin::Address::from_script(
                        &output.script_pubkey,
                        self.parser.network(),
                    )
                    .ok()
                    .map(|address| address.to_string()),
                    block_height: height,
                    deleted_at_block: None,
                });
            }
        }

        (inserts, spends, txids)
    }

    async fn recover_from_reorg(&mut self) -> anyhow::Result<()> {
        self.status.is_reorging = true;
        let local_tip = self
            .store
            .latest_block()
            .await?
            .context("reorg signalled with no local blocks")?
            .height;

        let fork = reorg::detect_fork_point(&self.store, &self.btc_client, local_tip).await?;
        reorg::unwind_to(&self.store, self.mempool.as_ref(), fork, local_tip).await?;

        self.status.current = fork;
        self.status.best_hash = self
            .store
            .block_by_height(fork)
            .await?
            .map(|header| header.hash)
            .unwrap_or_else(H256::zero);
        self.status.is_reorging = false;
        METRICS.current_height.set(fork.0);
        Ok(())
    }
}
