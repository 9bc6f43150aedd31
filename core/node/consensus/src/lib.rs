//! Consensus unit: signs checksum roots with the locally configured
//! validator identity, records inbound witnesses, computes finality against
//! the trusted-validator set, and drives the epoch mining protocol.

use std::sync::Arc;

use anyhow::Context as _;
use bitcoin::secp256k1::{schnorr::Signature, All, Keypair, Message, Secp256k1, XOnlyPublicKey};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use opnet_basic_types::{BlockNumber, EpochNumber, H256};
use opnet_config::ConsensusConfig;
use opnet_fabric::{Envelope, Fabric, Message as FabricMessage, Port, ThreadKind};
use opnet_storage::{Store, StoreError, WitnessFilter};
use opnet_types::{witness::witness_digest, BlockWitness};

pub mod epochs;
mod metrics;
pub mod validators;

pub use epochs::{EpochManager, EpochTemplate, SubmissionOutcome, SubmissionRequest};
pub use validators::TrustedValidatorSet;

use crate::metrics::METRICS;

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("no committed block at height {0}")]
    UnknownBlock(BlockNumber),

    #[error("invalid witness signature")]
    BadSignature,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Consensus {
    validators: TrustedValidatorSet,
    store: Arc<dyn Store>,
    epochs: Arc<EpochManager>,
    port: Port,
    secp: Secp256k1<All>,
    signer: Option<Keypair>,
}

impl std::fmt::Debug for Consensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consensus")
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

impl Consensus {
    pub fn new(
        config: ConsensusConfig,
        store: Arc<dyn Store>,
        epochs: Arc<EpochManager>,
        fabric: Fabric,
    ) -> anyhow::Result<Self> {
        let validators = TrustedValidatorSet::from_config(&config)?;
        let secp = Secp256k1::new();
        let signer = config
            .validator_secret_key
            .as_deref()
            .map(|secret| -> anyhow::Result<Keypair> {
                let raw = hex::decode(secret.trim_start_matches("0x"))
                    .context("validator secret key is not hex")?;
                Keypair::from_seckey_slice(&secp, &raw)
                    .context("validator secret key is not a valid secp256k1 key")
            })
            .transpose()?;
        let port = fabric.register(ThreadKind::Consensus, 0);

        Ok(Self {
            validators,
            store,
            epochs,
            port,
            secp,
            signer,
        })
    }

    pub fn validators(&self) -> &TrustedValidatorSet {
        &self.validators
    }

    pub async fn run(mut self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                envelope = self.port.recv() => {
                    match envelope {
                        Some(envelope) => {
                            if let Err(err) = self.handle_envelope(envelope).await {
                                warn!("consensus failed to handle message: {err:?}");
                            }
                        }
                        None => break,
                    }
                }
                _ = stop_receiver.changed() => {
                    if *stop_receiver.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Stop signal received, consensus is shutting down");
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        match envelope {
            Envelope::Notification {
                message:
                    FabricMessage::BlockProcessed {
                        height,
                        checksum_root,
                        ..
                    },
            } => self.handle_block_processed(height, checksum_root).await,
            Envelope::Notification { message } => {
                debug!("ignoring notification: {message:?}");
                Ok(())
            }
            Envelope::Request { reply, .. } => {
                reply.respond(opnet_fabric::ThreadResponse {
                    data: opnet_fabric::ResponseData::None,
                });
                Ok(())
            }
        }
    }

    #[instrument(skip(self), target = "consensus")]
    async fn handle_block_processed(
        &mut self,
        height: BlockNumber,
        checksum_root: H256,
    ) -> anyhow::Result<()> {
        if let Some(signer) = &self.signer {
            let witness = self.sign_witness(signer, height, checksum_root);
            if self.store.insert_witness(witness).await? {
                METRICS.witnesses_signed.inc();
                // Broadcasting to peers is the overlay network's concern;
                // the signed witness is visible through the API either way.
                debug!(%height, "signed block witness");
            }
        }

        if self.is_finalized(height).await? {
            METRICS.finalized_height.set(height.0);
        }

        // Epoch rollover: make sure the epoch exists, and settle it on its
        // last block.
        let epoch = self.epochs.open_epoch_for(height).await?;
        if height == epoch.end_block {
            self.epochs.finalize_epoch(epoch.epoch_number).await?;
        }
        Ok(())
    }

    fn sign_witness(
        &self,
        signer: &Keypair,
        height: BlockNumber,
        checksum_root: H256,
    ) -> BlockWitness {
        let message = Message::from_digest(witness_digest(checksum_root));
        let signature = self.secp.sign_schnorr_no_aux_rand(&message, signer);
        let pubkey = H256::from_slice(&signer.x_only_public_key().0.serialize());

        BlockWitness {
            block_number: height,
            signature: signature.as_ref().to_vec(),
            pubkey,
            timestamp: Utc::now(),
            proofs: None,
            trusted: self.validators.is_trusted(pubkey),
        }
    }

    /// Validates and records a witness received from a peer. Deduplication
    /// is per `(block, pubkey)`; arrival order does not matter.
    pub async fn record_witness(&self, witness: BlockWitness) -> Result<bool, WitnessError> {
        let header = self
            .store
            .block_by_height(witness.block_number)
            .await?
            .ok_or(WitnessError::UnknownBlock(witness.block_number))?;

        let signature =
            Signature::from_slice(&witness.signature).map_err(|_| WitnessError::BadSignature)?;
        let pubkey = XOnlyPublicKey::from_slice(witness.pubkey.as_bytes())
            .map_err(|_| WitnessError::BadSignature)?;
        let message = Message::from_digest(witness_digest(header.checksum_root));
        self.secp
            .verify_schnorr(&signature, &message, &pubkey)
            .map_err(|_| {
                METRICS.witnesses_rejected.inc();
                WitnessError::BadSignature
            })?;

        let mut witness = witness;
        witness.trusted = self.validators.is_trusted(witness.pubkey);
        let inserted = self.store.insert_witness(witness).await?;
        if inserted {
            METRICS.witnesses_recorded.inc();
        }
        Ok(inserted)
    }

    /// Whether the block at `height` satisfies the consensus minimums.
    pub async fn is_finalized(&self, height: BlockNumber) -> Result<bool, WitnessError> {
        let witnesses = self
            .store
            .witnesses_by_block(
                height,
                WitnessFilter {
                    trusted: Some(true),
                    limit: Some(usize::MAX),
                    page: None,
                },
            )
            .await?;
        Ok(self.validators.is_finalized(&witnesses))
    }

    /// Epoch number containing a height, under this node's epoch length.
    pub fn epoch_of(&self, height: BlockNumber) -> EpochNumber {
        EpochNumber::containing(height, self.epochs.blocks_per_epoch())
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SecretKey;
    use opnet_basic_types::U256;
    use opnet_config::TrustedEntityConfig;
    use opnet_storage::{BlockCommitBatch, InMemoryStore};
    use opnet_types::{BlockHeader, Epoch, EpochSubmission, SubmissionStatus};

    use super::*;

    fn header_at(height: u64, checksum_byte: u8) -> BlockHeader {
        BlockHeader {
            height: BlockNumber(height),
            hash: H256::repeat_byte(height as u8),
            prev_hash: H256::zero(),
            prev_checksum: H256::zero(),
            merkle_root: H256::zero(),
            storage_root: H256::zero(),
            receipt_root: H256::zero(),
            checksum_root: H256::repeat_byte(checksum_byte),
            checksum_proofs: vec![],
            tx_count: 0,
            ema: 0,
            base_gas: U256::zero(),
            bits: 0,
            nonce: 0,
            version: 2,
            size: 0,
            weight: 0,
            stripped_size: 0,
            time: 0,
            median_time: 0,
        }
    }

    async fn store_with_blocks(heights: &[(u64, u8)]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for &(height, checksum) in heights {
            store
                .commit_block(BlockCommitBatch {
                    header: Some(header_at(height, checksum)),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        store
    }

    fn signing_config(secret_byte: u8) -> (ConsensusConfig, H256) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[secret_byte; 32]).unwrap();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let pubkey = H256::from_slice(&keypair.x_only_public_key().0.serialize());

        let mut config = ConsensusConfig::for_tests();
        config.validator_secret_key = Some(hex::encode([secret_byte; 32]));
        config.entities = vec![TrustedEntityConfig {
            name: "local".to_string(),
            validators: vec![hex::encode(pubkey)],
        }];
        config.minimum = 1;
        config.minimum_validator_transaction_generation = 1;
        (config, pubkey)
    }

    fn consensus_over(
        config: ConsensusConfig,
        store: Arc<InMemoryStore>,
    ) -> (Consensus, Arc<EpochManager>) {
        let epochs = Arc::new(EpochManager::new(
            store.clone() as Arc<dyn Store>,
            config.blocks_per_epoch(),
            config.prefer_earliest_submission,
        ));
        let consensus = Consensus::new(
            config,
            store as Arc<dyn Store>,
            Arc::clone(&epochs),
            Fabric::new(),
        )
        .unwrap();
        (consensus, epochs)
    }

    #[tokio::test]
    async fn signed_witness_verifies_and_finalises_with_minimum_one() {
        let store = store_with_blocks(&[(10, 0xaa)]).await;
        let (config, pubkey) = signing_config(7);
        let (mut consensus, _) = consensus_over(config, Arc::clone(&store));

        consensus
            .handle_block_processed(BlockNumber(10), H256::repeat_byte(0xaa))
            .await
            .unwrap();

        let witnesses = store
            .witnesses_by_block(BlockNumber(10), WitnessFilter::default())
            .await
            .unwrap();
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0].pubkey, pubkey);
        assert!(witnesses[0].trusted);

        // The recorded signature passes independent verification.
        let again = consensus.record_witness(witnesses[0].clone()).await.unwrap();
        assert!(!again, "same (block, pubkey) witness is deduplicated");
        assert!(consensus.is_finalized(BlockNumber(10)).await.unwrap());
    }

    #[tokio::test]
    async fn tampered_witness_is_rejected() {
        let store = store_with_blocks(&[(10, 0xaa)]).await;
        let (config, _) = signing_config(7);
        let (mut consensus, _) = consensus_over(config, Arc::clone(&store));

        consensus
            .handle_block_processed(BlockNumber(10), H256::repeat_byte(0xaa))
            .await
            .unwrap();
        let mut witness = store
            .witnesses_by_block(BlockNumber(10), WitnessFilter::default())
            .await
            .unwrap()
            .remove(0);
        witness.signature[0] ^= 0xff;
        witness.pubkey = H256::repeat_byte(0x33);

        assert_matches::assert_matches!(
            consensus.record_witness(witness).await,
            Err(WitnessError::BadSignature)
        );
    }

    #[tokio::test]
    async fn epoch_template_and_submission_round_trip() {
        // Tip at height 7 with 5 blocks per epoch: epoch 1, start block 5.
        let store = store_with_blocks(&[(5, 0x11), (6, 0x12), (7, 0x13)]).await;
        let epochs = EpochManager::new(store.clone() as Arc<dyn Store>, 5, true);

        let template = epochs.template().await.unwrap();
        assert_eq!(template.epoch_number, EpochNumber(1));
        assert_eq!(template.epoch_target, H256::repeat_byte(0x11));
        assert_eq!(
            template.target_hash,
            Epoch::target_hash_of(H256::repeat_byte(0x11))
        );

        // A correctly signed submission is recorded as pending.
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let legacy_pubkey = H256::from_slice(&keypair.x_only_public_key().0.serialize());
        let mldsa_pubkey = vec![0xab; 48];
        let salt = H256::repeat_byte(0x44);

        let payload = EpochSubmission::signing_payload(
            template.epoch_number,
            template.target_hash,
            salt,
            &mldsa_pubkey,
            None,
        );
        let signature = secp
            .sign_schnorr_no_aux_rand(&Message::from_digest(payload), &keypair)
            .as_ref()
            .to_vec();

        let outcome = epochs
            .submit(SubmissionRequest {
                epoch_number: template.epoch_number,
                target_hash: template.target_hash,
                salt,
                mldsa_pubkey: mldsa_pubkey.clone(),
                legacy_pubkey,
                graffiti: None,
                signature: signature.clone(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, SubmissionStatus::Pending);
        assert_eq!(
            outcome.difficulty,
            opnet_types::epoch::matching_bits(
                EpochSubmission::solution_of(&mldsa_pubkey, salt),
                template.target_hash,
            )
        );

        // Re-submitting with a broken signature fails.
        let mut broken = signature;
        broken[10] ^= 0x01;
        let rejected = epochs
            .submit(SubmissionRequest {
                epoch_number: template.epoch_number,
                target_hash: template.target_hash,
                salt,
                mldsa_pubkey,
                legacy_pubkey,
                graffiti: None,
                signature: broken,
            })
            .await;
        assert_matches::assert_matches!(rejected, Err(epochs::EpochError::BadSignature));
    }

    #[tokio::test]
    async fn wrong_target_hash_is_rejected() {
        let store = store_with_blocks(&[(5, 0x11)]).await;
        let epochs = EpochManager::new(store as Arc<dyn Store>, 5, true);
        let template = epochs.template().await.unwrap();

        let result = epochs
            .submit(SubmissionRequest {
                epoch_number: template.epoch_number,
                target_hash: opnet_basic_types::H160::repeat_byte(0xff),
                salt: H256::zero(),
                mldsa_pubkey: vec![1],
                legacy_pubkey: H256::zero(),
                graffiti: None,
                signature: vec![0; 64],
            })
            .await;
        assert_matches::assert_matches!(result, Err(epochs::EpochError::TargetMismatch));
    }

    #[tokio::test]
    async fn winner_selection_prefers_earliest_on_equal_bits() {
        let store = store_with_blocks(&[(0, 0x11), (1, 0x12)]).await;
        let epochs = EpochManager::new(store.clone() as Arc<dyn Store>, 5, true);
        let epoch = epochs.open_epoch_for(BlockNumber(0)).await.unwrap();

        let base = EpochSubmission {
            epoch_number: epoch.epoch_number,
            submission_hash: H256::repeat_byte(1),
            mldsa_pubkey: vec![1],
            legacy_pubkey: H256::repeat_byte(1),
            salt: H256::zero(),
            graffiti: None,
            signature: vec![],
            solution: opnet_basic_types::H160::zero(),
            matching_bits: 17,
            status: SubmissionStatus::Pending,
            confirmed_at: Utc::now(),
        };
        let mut earlier = base.clone();
        earlier.submission_hash = H256::repeat_byte(2);
        earlier.confirmed_at = base.confirmed_at - chrono::Duration::seconds(1);

        store.insert_epoch_submission(base.clone()).await.unwrap();
        store.insert_epoch_submission(earlier.clone()).await.unwrap();

        epochs.finalize_epoch(epoch.epoch_number).await.unwrap();

        let settled = store.epoch_submissions(epoch.epoch_number).await.unwrap();
        let winner = settled
            .iter()
            .find(|s| s.status == SubmissionStatus::Accepted)
            .unwrap();
        assert_eq!(winner.submission_hash, earlier.submission_hash);
        assert!(settled
            .iter()
            .any(|s| s.status == SubmissionStatus::Rejected));

        let finalised = store
            .epoch_by_number(epoch.epoch_number)
            .await
            .unwrap()
            .unwrap();
        let proposer = finalised.proposer.unwrap();
        assert_eq!(proposer.legacy_pubkey, earlier.legacy_pubkey);
        assert_eq!(finalised.difficulty_scaled, U256::from(17u32));
    }
}
