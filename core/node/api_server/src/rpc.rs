//! Implementation of the `btc` namespace over the node state.

use async_trait::async_trait;
use jsonrpsee::{
    core::{RpcResult, SubscriptionResult},
    types::ErrorObjectOwned,
    PendingSubscriptionSink, SubscriptionMessage,
};
use tracing::debug;

use opnet_basic_types::{BlockNumber, EpochNumber, H256};
use opnet_fabric::{Message, ResponseData, ThreadKind};
use opnet_rpc_decl::{
    from_hex, to_hex, u64_to_hex, BlockHeaderResponse, BlockResponse, BlockTag,
    BroadcastResponse, ChecksumProofResponse, CodeResponse, EpochProposerResponse, EpochResponse,
    EpochTemplateResponse, EventResponse, MempoolInfoResponse, OpnetApiServer,
    PendingTransactionResponse, ReceiptResponse, ReorgResponse, SimulateRequest,
    SimulateResponse, StorageProofResponse, StorageValueResponse, SubmitEpochRequest,
    SubmitEpochResponse, SubscriptionTopic, TransactionInputResponse, TransactionOutputResponse,
    TransactionResponse, UtxoResponse, UtxosResponse, WitnessResponse,
};
use opnet_storage::{StoreError, WitnessFilter};
use opnet_types::{
    BlockHeader, Epoch, MempoolEntry, OverlayTransaction, SubmissionStatus, TransactionReceipt,
    UtxoEntry, MAX_GAS_PER_TX,
};

use crate::{
    error::{chain_error, internal_error, reorg_in_progress, validation_error},
    RpcState,
};

/// Outputs below this value are treated as dust by the `optimize` flag of
/// `btc_getUTXOs` (P2TR dust threshold).
const DUST_LIMIT_SAT: u64 = 330;

fn store_err(err: StoreError) -> ErrorObjectOwned {
    internal_error(err)
}

impl RpcState {
    async fn resolve_header(
        &self,
        tag: Option<BlockTag>,
    ) -> Result<Option<BlockHeader>, ErrorObjectOwned> {
        match tag.unwrap_or_default() {
            BlockTag::Latest => self.store.latest_block().await.map_err(store_err),
            BlockTag::Height(height) => self
                .store
                .block_by_height(BlockNumber(height))
                .await
                .map_err(store_err),
        }
    }

    async fn block_response(
        &self,
        header: BlockHeader,
        send_transactions: bool,
    ) -> Result<BlockResponse, ErrorObjectOwned> {
        let transactions = if send_transactions {
            let transactions = self
                .store
                .transactions_by_block(header.height)
                .await
                .map_err(store_err)?;
            Some(
                transactions
                    .iter()
                    .map(|tx| tx_to_response(tx, true))
                    .collect(),
            )
        } else {
            None
        };
        Ok(BlockResponse {
            header: header_to_response(&header),
            transactions,
        })
    }

    async fn simulate(&self, request: SimulateRequest) -> RpcResult<SimulateResponse> {
        let contract_key = match self.resolve_contract_key(&request.to).await? {
            Some(key) => key,
            None => {
                return Ok(SimulateResponse::Failure {
                    error: format!("no contract at {}", request.to),
                })
            }
        };
        let calldata = match from_hex(&request.calldata) {
            Ok(calldata) => calldata,
            Err(e) => return Err(validation_error(format!("invalid calldata: {e}"))),
        };
        let caller = request
            .from
            .as_deref()
            .and_then(|from| from_hex(from).ok())
            .filter(|raw| raw.len() == 32)
            .map(|raw| H256::from_slice(&raw))
            .unwrap_or_else(H256::zero);

        let height = match request.block_number.unwrap_or_default() {
            BlockTag::Latest => match self.store.latest_block().await.map_err(store_err)? {
                Some(header) => header.height,
                None => BlockNumber(0),
            },
            BlockTag::Height(height) => BlockNumber(height),
        };

        let store = std::sync::Arc::clone(&self.store);
        let vm = std::sync::Arc::clone(&self.vm);
        let receipt = tokio::task::spawn_blocking(move || {
            opnet_indexer::execution::simulate_call(
                store,
                &vm,
                height,
                contract_key,
                calldata,
                caller,
                MAX_GAS_PER_TX,
            )
        })
        .await
        .map_err(internal_error)?;

        Ok(match receipt.revert {
            Some(reason) => SimulateResponse::Failure { error: reason },
            None => SimulateResponse::Success {
                result: to_hex(receipt.result.as_deref().unwrap_or_default()),
                events: receipt
                    .events
                    .iter()
                    .map(|event| EventResponse {
                        contract: event.contract,
                        data: to_hex(&event.data),
                    })
                    .collect(),
                access_list: serde_json::to_value(&receipt.access_list)
                    .unwrap_or(serde_json::Value::Null),
            },
        })
    }

    /// Contracts are addressable by P2TR address or 32-byte tweaked key.
    async fn resolve_contract_key(
        &self,
        reference: &str,
    ) -> Result<Option<H256>, ErrorObjectOwned> {
        if let Some(contract) = self
            .store
            .contract_by_address(reference)
            .await
            .map_err(store_err)?
        {
            return Ok(Some(contract.tweaked_pubkey));
        }
        if let Ok(raw) = from_hex(reference) {
            if raw.len() == 32 {
                let key = H256::from_slice(&raw);
                if self
                    .store
                    .contract_by_tweaked_key(key)
                    .await
                    .map_err(store_err)?
                    .is_some()
                {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    async fn is_reorging(&self) -> bool {
        match self
            .fabric
            .request(
                ThreadKind::Indexer,
                Message::CurrentIndexerBlock,
                self.config.request_timeout(),
            )
            .await
        {
            Ok(response) => matches!(
                response.data,
                ResponseData::SyncStatus(status) if status.is_reorging
            ),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl OpnetApiServer for RpcState {
    async fn block_number(&self) -> RpcResult<String> {
        let header = self.store.latest_block().await.map_err(store_err)?;
        Ok(u64_to_hex(header.map(|h| h.height.0).unwrap_or_default()))
    }

    async fn get_block_by_hash(
        &self,
        block_hash: H256,
        send_transactions: Option<bool>,
    ) -> RpcResult<Option<BlockResponse>> {
        let Some(header) = self.store.block_by_hash(block_hash).await.map_err(store_err)? else {
            return Ok(None);
        };
        Ok(Some(
            self.block_response(header, send_transactions.unwrap_or(false))
                .await?,
        ))
    }

    async fn get_block_by_number(
        &self,
        height: Option<BlockTag>,
        send_transactions: Option<bool>,
    ) -> RpcResult<Option<BlockResponse>> {
        let Some(header) = self.resolve_header(height).await? else {
            return Ok(None);
        };
        Ok(Some(
            self.block_response(header, send_transactions.unwrap_or(false))
                .await?,
        ))
    }

    async fn get_block_header_by_hash(
        &self,
        block_hash: H256,
    ) -> RpcResult<Option<BlockHeaderResponse>> {
        Ok(self
            .store
            .block_by_hash(block_hash)
            .await
            .map_err(store_err)?
            .map(|header| header_to_response(&header)))
    }

    async fn get_block_header_by_number(
        &self,
        height: Option<BlockTag>,
    ) -> RpcResult<Option<BlockHeaderResponse>> {
        Ok(self
            .resolve_header(height)
            .await?
            .map(|header| header_to_response(&header)))
    }

    async fn get_transaction_by_hash(
        &self,
        hash: H256,
    ) -> RpcResult<Option<TransactionResponse>> {
        Ok(self
            .store
            .transaction_by_id(hash)
            .await
            .map_err(store_err)?
            .map(|tx| tx_to_response(&tx, true)))
    }

    async fn get_transaction_receipt(&self, hash: H256) -> RpcResult<Option<ReceiptResponse>> {
        Ok(self
            .store
            .receipt_by_id(hash)
            .await
            .map_err(store_err)?
            .map(receipt_to_response))
    }

    async fn send_raw_transaction(
        &self,
        data: String,
        psbt: Option<bool>,
    ) -> RpcResult<BroadcastResponse> {
        if self.is_reorging().await {
            return Err(reorg_in_progress());
        }
        let raw = from_hex(&data).map_err(|e| validation_error(format!("invalid hex: {e}")))?;

        let outcome = if psbt.unwrap_or(false) {
            self.mempool.submit_psbt(raw).await
        } else {
            self.mempool.submit_raw(raw.clone()).await
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                return Ok(BroadcastResponse {
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    peers: None,
                    identifier: None,
                    modified_transaction: None,
                    finalized_transaction: None,
                    transaction_type: None,
                })
            }
        };

        // Finalised submissions are forwarded to the base chain. For PSBTs
        // the admitted outcome carries the extracted transaction; the
        // submitted PSBT bytes themselves are never broadcastable.
        let mut error = None;
        if outcome.finalized {
            if let Some(tx_bytes) = &outcome.finalized_tx {
                if let Err(e) = self
                    .btc_client
                    .broadcast_signed_transaction(&hex::encode(tx_bytes))
                    .await
                {
                    error = Some(chain_error(e).to_string());
                }
            }
        }

        Ok(BroadcastResponse {
            success: error.is_none(),
            result: Some(to_hex(outcome.id.as_bytes())),
            error,
            peers: None,
            identifier: Some(outcome.id),
            modified_transaction: outcome.modified.as_deref().map(to_hex),
            finalized_transaction: outcome.psbt.then_some(outcome.finalized),
            transaction_type: Some(format!("{:?}", outcome.kind).to_lowercase()),
        })
    }

    async fn simulate_transaction(&self, request: SimulateRequest) -> RpcResult<SimulateResponse> {
        self.simulate(request).await
    }

    async fn call(&self, request: SimulateRequest) -> RpcResult<SimulateResponse> {
        self.simulate(request).await
    }

    async fn get_utxos(
        &self,
        address: String,
        optimize: Option<bool>,
    ) -> RpcResult<UtxosResponse> {
        let live = self
            .store
            .live_utxos_by_address(&address)
            .await
            .map_err(store_err)?;
        let spent = self
            .store
            .spent_utxos_by_address(&address)
            .await
            .map_err(store_err)?;
        let pending_entries = self
            .store
            .mempool_entries_by_addresses(std::slice::from_ref(&address), usize::MAX)
            .await
            .map_err(store_err)?;

        let raw: Vec<UtxoResponse> = live.iter().map(utxo_to_response).collect();
        let confirmed = live
            .iter()
            .filter(|utxo| !optimize.unwrap_or(false) || utxo.value >= DUST_LIMIT_SAT)
            .map(utxo_to_response)
            .collect();
        let pending = pending_entries
            .iter()
            .flat_map(|entry| pending_outputs_for(entry, &address))
            .collect();

        Ok(UtxosResponse {
            confirmed,
            spent_transactions: spent.iter().map(utxo_to_response).collect(),
            pending,
            raw,
        })
    }

    async fn get_balance(
        &self,
        address: String,
        _filter_ordinals: Option<bool>,
    ) -> RpcResult<String> {
        let live = self
            .store
            .live_utxos_by_address(&address)
            .await
            .map_err(store_err)?;
        let total: u64 = live.iter().map(|utxo| utxo.value).sum();
        Ok(u64_to_hex(total))
    }

    async fn get_code(
        &self,
        address: String,
        only_bytecode: Option<bool>,
    ) -> RpcResult<Option<CodeResponse>> {
        let contract = match self.store.contract_by_address(&address).await.map_err(store_err)? {
            Some(contract) => contract,
            None => return Ok(None),
        };

        let bytecode = to_hex(&contract.bytecode);
        Ok(Some(if only_bytecode.unwrap_or(false) {
            CodeResponse {
                bytecode,
                contract_address: None,
                contract_tweaked_public_key: None,
                deployer: None,
                deployment_height: None,
            }
        } else {
            CodeResponse {
                bytecode,
                contract_address: Some(contract.contract_address),
                contract_tweaked_public_key: Some(contract.tweaked_pubkey),
                deployer: Some(contract.deployer),
                deployment_height: Some(u64_to_hex(contract.deployment_height.0)),
            }
        }))
    }

    async fn get_storage_at(
        &self,
        address: String,
        pointer: H256,
        send_proofs: Option<bool>,
        height: Option<BlockTag>,
    ) -> RpcResult<Option<StorageValueResponse>> {
        let Some(contract_key) = self.resolve_contract_key(&address).await? else {
            return Ok(None);
        };
        let at = match height.unwrap_or_default() {
            BlockTag::Latest => match self.store.latest_block().await.map_err(store_err)? {
                Some(header) => header.height,
                None => return Ok(None),
            },
            BlockTag::Height(height) => BlockNumber(height),
        };

        let Some(row) = self
            .store
            .pointer_value_at(contract_key, pointer, at)
            .await
            .map_err(store_err)?
        else {
            return Ok(None);
        };

        Ok(Some(StorageValueResponse {
            pointer,
            value: row.value,
            height: u64_to_hex(row.last_seen_at.0),
            proofs: send_proofs.unwrap_or(false).then(|| StorageProofResponse {
                index: row.proof.index,
                total: row.proof.total,
                siblings: row.proof.siblings,
            }),
        }))
    }

    async fn chain_id(&self) -> RpcResult<String> {
        Ok(u64_to_hex(self.chain.chain_id))
    }

    async fn reorg(
        &self,
        from_block: Option<BlockTag>,
        to_block: Option<BlockTag>,
    ) -> RpcResult<Vec<ReorgResponse>> {
        let records = self
            .store
            .reorgs_in_range(
                from_block.and_then(BlockTag::height).map(BlockNumber),
                to_block.and_then(BlockTag::height).map(BlockNumber),
            )
            .await
            .map_err(store_err)?;
        Ok(records
            .iter()
            .map(|record| ReorgResponse {
                from_block: u64_to_hex(record.from_block.0),
                to_block: u64_to_hex(record.to_block.0),
                timestamp: record.timestamp,
            })
            .collect())
    }

    async fn get_block_witness(
        &self,
        height: BlockTag,
        trusted: Option<bool>,
        limit: Option<usize>,
        page: Option<usize>,
    ) -> RpcResult<Vec<WitnessResponse>> {
        let height = match height {
            BlockTag::Latest => match self.store.latest_block().await.map_err(store_err)? {
                Some(header) => header.height,
                None => return Ok(vec![]),
            },
            BlockTag::Height(height) => BlockNumber(height),
        };
        let witnesses = self
            .store
            .witnesses_by_block(
                height,
                WitnessFilter {
                    trusted,
                    limit,
                    page,
                },
            )
            .await
            .map_err(store_err)?;
        Ok(witnesses
            .iter()
            .map(|witness| WitnessResponse {
                block_number: u64_to_hex(witness.block_number.0),
                signature: to_hex(&witness.signature),
                pubkey: witness.pubkey,
                timestamp: witness.timestamp,
                trusted: witness.trusted,
            })
            .collect())
    }

    async fn get_mempool_info(&self) -> RpcResult<MempoolInfoResponse> {
        let info = self
            .mempool
            .get_info()
            .await
            .map_err(internal_error)?;
        Ok(MempoolInfoResponse {
            count: info.count,
            opnet_count: info.opnet_count,
            size: info.size,
        })
    }

    async fn get_pending_transaction(
        &self,
        hash: H256,
    ) -> RpcResult<Option<PendingTransactionResponse>> {
        Ok(self
            .mempool
            .get_pending(hash)
            .await
            .map_err(internal_error)?
            .map(|entry| pending_to_response(&entry)))
    }

    async fn get_latest_pending_transactions(
        &self,
        address: Option<String>,
        addresses: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> RpcResult<Vec<PendingTransactionResponse>> {
        let mut filter = addresses.unwrap_or_default();
        if let Some(address) = address {
            filter.push(address);
        }
        let entries = self
            .mempool
            .get_latest(&filter, limit)
            .await
            .map_err(internal_error)?;
        Ok(entries.iter().map(pending_to_response).collect())
    }

    async fn get_epoch_by_number(&self, number: BlockTag) -> RpcResult<Option<EpochResponse>> {
        let epoch = match number {
            BlockTag::Latest => self.store.latest_epoch().await.map_err(store_err)?,
            BlockTag::Height(number) => self
                .store
                .epoch_by_number(EpochNumber(number))
                .await
                .map_err(store_err)?,
        };
        Ok(epoch.as_ref().map(epoch_to_response))
    }

    async fn get_epoch_by_hash(&self, hash: H256) -> RpcResult<Option<EpochResponse>> {
        Ok(self
            .store
            .epoch_by_hash(hash)
            .await
            .map_err(store_err)?
            .as_ref()
            .map(epoch_to_response))
    }

    async fn get_epoch_template(&self) -> RpcResult<EpochTemplateResponse> {
        let template = self
            .epochs
            .template()
            .await
            .map_err(internal_error)?;
        Ok(EpochTemplateResponse {
            epoch_number: u64_to_hex(template.epoch_number.0),
            epoch_target: template.epoch_target,
            target_hash: template.target_hash,
        })
    }

    async fn submit_epoch(
        &self,
        submission: SubmitEpochRequest,
    ) -> RpcResult<SubmitEpochResponse> {
        let epoch_number = submission
            .epoch_number
            .height()
            .ok_or_else(|| validation_error("epochNumber must be explicit"))?;
        let mldsa_pubkey = from_hex(&submission.mldsa_public_key)
            .map_err(|e| validation_error(format!("invalid mldsaPublicKey: {e}")))?;
        let signature = from_hex(&submission.signature)
            .map_err(|e| validation_error(format!("invalid signature: {e}")))?;
        let graffiti = submission
            .graffiti
            .as_deref()
            .map(from_hex)
            .transpose()
            .map_err(|e| validation_error(format!("invalid graffiti: {e}")))?;

        let outcome = self
            .epochs
            .submit(opnet_consensus::SubmissionRequest {
                epoch_number: EpochNumber(epoch_number),
                target_hash: submission.target_hash,
                salt: submission.salt,
                mldsa_pubkey,
                legacy_pubkey: submission.legacy_public_key,
                graffiti,
                signature,
            })
            .await;

        match outcome {
            Ok(outcome) => Ok(SubmitEpochResponse {
                status: status_name(outcome.status),
                submission_hash: outcome.submission_hash,
                difficulty: outcome.difficulty,
                timestamp: outcome.timestamp,
                message: outcome.message,
            }),
            Err(err) => {
                debug!("epoch submission rejected: {err}");
                Ok(SubmitEpochResponse {
                    status: status_name(SubmissionStatus::Rejected),
                    submission_hash: H256::zero(),
                    difficulty: 0,
                    timestamp: chrono::Utc::now(),
                    message: Some(err.to_string()),
                })
            }
        }
    }

    async fn subscribe(
        &self,
        pending: PendingSubscriptionSink,
        topic: SubscriptionTopic,
    ) -> SubscriptionResult {
        let sink = pending.accept().await?;
        let id = self.subscriptions.track(topic);
        let mut feed = self.subscriptions.feed();
        debug!(id, ?topic, "subscription opened");

        loop {
            tokio::select! {
                _ = sink.closed() => break,
                event = feed.recv() => match event {
                    Ok((event_topic, event)) if event_topic == topic => {
                        let Ok(message) = SubscriptionMessage::from_json(&event) else {
                            continue;
                        };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.subscriptions.untrack(id);
        debug!(id, "subscription closed");
        Ok(())
    }
}

fn header_to_response(header: &BlockHeader) -> BlockHeaderResponse {
    BlockHeaderResponse {
        height: u64_to_hex(header.height.0),
        hash: header.hash,
        previous_block_hash: header.prev_hash,
        previous_block_checksum: header.prev_checksum,
        merkle_root: header.merkle_root,
        storage_root: header.storage_root,
        receipt_root: header.receipt_root,
        checksum_root: header.checksum_root,
        checksum_proofs: header
            .checksum_proofs
            .iter()
            .map(|proof| ChecksumProofResponse {
                index: proof.index,
                hashes: proof.hashes.clone(),
            })
            .collect(),
        tx_count: header.tx_count,
        ema: format!("0x{:x}", header.ema),
        base_gas: format!("0x{:x}", header.base_gas),
        bits: u64_to_hex(u64::from(header.bits)),
        nonce: header.nonce,
        version: header.version,
        size: header.size,
        weight: header.weight,
        stripped_size: header.stripped_size,
        time: header.time,
        median_time: header.median_time,
    }
}

fn tx_to_response(tx: &OverlayTransaction, include_raw: bool) -> TransactionResponse {
    let base = tx.base();
    let (contract_address, calldata, gas_limit, priority_fee) = match tx {
        OverlayTransaction::Generic(_) => (None, None, None, None),
        OverlayTransaction::Deployment(deployment) => (
            Some(deployment.contract_address.clone()),
            None,
            None,
            None,
        ),
        OverlayTransaction::Interaction(interaction) => (
            Some(interaction.contract_address.clone()),
            Some(to_hex(&interaction.calldata)),
            Some(u64_to_hex(interaction.theoretical_gas_limit)),
            Some(u64_to_hex(interaction.priority_fee)),
        ),
    };

    TransactionResponse {
        id: base.txid,
        hash: base.indexing_hash,
        block_height: u64_to_hex(base.block_height.0),
        kind: format!("{:?}", tx.kind()).to_lowercase(),
        inputs: base
            .inputs
            .iter()
            .map(|input| TransactionInputResponse {
                transaction_id: input.prev_txid,
                output_index: input.prev_vout,
            })
            .collect(),
        outputs: base
            .outputs
            .iter()
            .map(|output| TransactionOutputResponse {
                value: output.value,
                script_pub_key: to_hex(&output.script_pubkey),
                address: output.address.clone(),
            })
            .collect(),
        raw: (include_raw && !base.raw.is_empty()).then(|| to_hex(&base.raw)),
        contract_address,
        calldata,
        gas_limit,
        priority_fee,
    }
}

fn receipt_to_response(receipt: TransactionReceipt) -> ReceiptResponse {
    ReceiptResponse {
        receipt: receipt.result.as_deref().map(to_hex),
        receipt_proofs: receipt.proofs,
        events: receipt
            .events
            .iter()
            .map(|event| EventResponse {
                contract: event.contract,
                data: to_hex(&event.data),
            })
            .collect(),
        gas_used: u64_to_hex(receipt.gas_used),
        revert: receipt.revert,
        deployed_contracts: receipt.deployed_contracts,
    }
}

fn utxo_to_response(utxo: &UtxoEntry) -> UtxoResponse {
    UtxoResponse {
        transaction_id: utxo.txid,
        output_index: utxo.vout,
        value: utxo.value,
        script_pub_key: to_hex(&utxo.script_pubkey),
        block_height: u64_to_hex(utxo.block_height.0),
    }
}

fn pending_outputs_for(entry: &MempoolEntry, address: &str) -> Vec<UtxoResponse> {
    entry
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| output.address.as_deref() == Some(address))
        .map(|(vout, output)| UtxoResponse {
            transaction_id: entry.id,
            output_index: vout as u32,
            value: output.value,
            script_pub_key: to_hex(&output.script_pubkey),
            block_height: u64_to_hex(0),
        })
        .collect()
}

fn pending_to_response(entry: &MempoolEntry) -> PendingTransactionResponse {
    PendingTransactionResponse {
        id: entry.id,
        first_seen: entry.first_seen,
        psbt: entry.psbt,
        kind: format!("{:?}", entry.kind).to_lowercase(),
        from: entry.from.clone(),
        contract_address: entry.contract_address.clone(),
        priority_fee: u64_to_hex(entry.priority_fee),
        theoretical_gas_limit: u64_to_hex(entry.theoretical_gas_limit),
    }
}

fn epoch_to_response(epoch: &Epoch) -> EpochResponse {
    EpochResponse {
        epoch_number: u64_to_hex(epoch.epoch_number.0),
        epoch_hash: epoch.epoch_hash(),
        start_block: u64_to_hex(epoch.start_block.0),
        end_block: u64_to_hex(epoch.end_block.0),
        epoch_target: epoch.epoch_target,
        target_hash: epoch.target_hash,
        proposer: epoch.proposer.as_ref().map(|proposer| EpochProposerResponse {
            mldsa_public_key: to_hex(&proposer.mldsa_pubkey),
            legacy_public_key: proposer.legacy_pubkey,
            salt: proposer.salt,
            graffiti: proposer.graffiti.as_deref().map(to_hex),
            solution: proposer.solution,
        }),
        difficulty_scaled: format!("0x{:x}", epoch.difficulty_scaled),
    }
}

fn status_name(status: SubmissionStatus) -> String {
    format!("{status:?}").to_lowercase()
}
