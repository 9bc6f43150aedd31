//! Epoch mining protocol: template generation, submission validation, and
//! winner selection.

use std::sync::Arc;

use bitcoin::secp256k1::{schnorr::Signature, All, Message, Secp256k1, XOnlyPublicKey};
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, instrument};

use opnet_basic_types::{BlockNumber, EpochNumber, H160, H256, U256};
use opnet_storage::{PublicKeyEntry, Store, StoreError};
use opnet_types::{
    epoch::matching_bits, Epoch, EpochProposer, EpochSubmission, SubmissionStatus,
};

use crate::metrics::METRICS;

#[derive(Debug, Error)]
pub enum EpochError {
    #[error("no committed blocks to derive an epoch template from")]
    NoBlocks,

    #[error("submission targets epoch {submitted}, current epoch is {current}")]
    WrongEpoch {
        submitted: EpochNumber,
        current: EpochNumber,
    },

    #[error("submission target hash does not match the local template")]
    TargetMismatch,

    #[error("invalid submission signature")]
    BadSignature,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochTemplate {
    pub epoch_number: EpochNumber,
    /// Checksum root of the epoch's start header.
    pub epoch_target: H256,
    pub target_hash: H160,
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub epoch_number: EpochNumber,
    pub target_hash: H160,
    pub salt: H256,
    pub mldsa_pubkey: Vec<u8>,
    /// X-only key the schnorr `signature` verifies against.
    pub legacy_pubkey: H256,
    pub graffiti: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub submission_hash: H256,
    /// Matching-bit count of the candidate solution.
    pub difficulty: u32,
    pub timestamp: chrono::DateTime<Utc>,
    pub message: Option<String>,
}

/// Shared epoch state machine; used by the consensus unit for rollover and
/// by the API for templates and submissions.
pub struct EpochManager {
    store: Arc<dyn Store>,
    secp: Secp256k1<All>,
    blocks_per_epoch: u64,
    /// Tie-break rule for equal matching bits; earliest confirmation wins
    /// when set.
    prefer_earliest_submission: bool,
}

impl std::fmt::Debug for EpochManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochManager")
            .field("blocks_per_epoch", &self.blocks_per_epoch)
            .finish()
    }
}

impl EpochManager {
    pub fn new(
        store: Arc<dyn Store>,
        blocks_per_epoch: u64,
        prefer_earliest_submission: bool,
    ) -> Self {
        Self {
            store,
            secp: Secp256k1::new(),
            blocks_per_epoch: blocks_per_epoch.max(1),
            prefer_earliest_submission,
        }
    }

    pub fn blocks_per_epoch(&self) -> u64 {
        self.blocks_per_epoch
    }

    /// Template for the epoch containing the current tip.
    #[instrument(skip(self), target = "consensus::epochs")]
    pub async fn template(&self) -> Result<EpochTemplate, EpochError> {
        let tip = self.store.latest_block().await?.ok_or(EpochError::NoBlocks)?;
        let epoch_number = EpochNumber::containing(tip.height, self.blocks_per_epoch);
        let start = epoch_number.start_block(self.blocks_per_epoch);

        // The epoch anchors on its start header; before that header exists
        // (start of chain) the latest one stands in.
        let basis = match self.store.block_by_height(start).await? {
            Some(header) => header,
            None => tip,
        };

        Ok(EpochTemplate {
            epoch_number,
            epoch_target: basis.checksum_root,
            target_hash: Epoch::target_hash_of(basis.checksum_root),
        })
    }

    /// Validates and records one mining submission.
    #[instrument(skip(self, request), target = "consensus::epochs")]
    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, EpochError> {
        let template = self.template().await?;
        if request.epoch_number != template.epoch_number {
            return Err(EpochError::WrongEpoch {
                submitted: request.epoch_number,
                current: template.epoch_number,
            });
        }
        if request.target_hash != template.target_hash {
            return Err(EpochError::TargetMismatch);
        }

        let payload = EpochSubmission::signing_payload(
            request.epoch_number,
            request.target_hash,
            request.salt,
            &request.mldsa_pubkey,
            request.graffiti.as_deref(),
        );
        self.verify_signature(&payload, &request.signature, request.legacy_pubkey)?;

        let solution = EpochSubmission::solution_of(&request.mldsa_pubkey, request.salt);
        let difficulty = matching_bits(solution, template.target_hash);
        let submission_hash = {
            let mut hasher = Sha256::new();
            hasher.update(payload);
            hasher.update(&request.signature);
            H256::from_slice(&hasher.finalize())
        };
        let confirmed_at = Utc::now();

        self.store
            .insert_epoch_submission(EpochSubmission {
                epoch_number: request.epoch_number,
                submission_hash,
                mldsa_pubkey: request.mldsa_pubkey.clone(),
                legacy_pubkey: request.legacy_pubkey,
                salt: request.salt,
                graffiti: request.graffiti,
                signature: request.signature,
                solution,
                matching_bits: difficulty,
                status: SubmissionStatus::Pending,
                confirmed_at,
            })
            .await?;
        self.store
            .insert_public_key(PublicKeyEntry {
                legacy_pubkey: request.legacy_pubkey,
                mldsa_pubkey: request.mldsa_pubkey,
            })
            .await?;
        METRICS.submissions_accepted.inc();

        Ok(SubmissionOutcome {
            status: SubmissionStatus::Pending,
            submission_hash,
            difficulty,
            timestamp: confirmed_at,
            message: None,
        })
    }

    /// Ensures the epoch record containing `height` exists.
    pub async fn open_epoch_for(&self, height: BlockNumber) -> Result<Epoch, EpochError> {
        let epoch_number = EpochNumber::containing(height, self.blocks_per_epoch);
        if let Some(epoch) = self.store.epoch_by_number(epoch_number).await? {
            return Ok(epoch);
        }

        let template = self.template().await?;
        let epoch = Epoch {
            epoch_number,
            start_block: epoch_number.start_block(self.blocks_per_epoch),
            end_block: epoch_number.end_block(self.blocks_per_epoch),
            epoch_target: template.epoch_target,
            target_hash: template.target_hash,
            proposer: None,
            proofs: vec![],
            difficulty_scaled: U256::zero(),
        };
        self.store.upsert_epoch(epoch.clone()).await?;
        info!(epoch = %epoch_number, "opened epoch");
        Ok(epoch)
    }

    /// Winner selection at epoch end: highest matching bits, tie-broken by
    /// the configured rule.
    #[instrument(skip(self), target = "consensus::epochs")]
    pub async fn finalize_epoch(&self, epoch_number: EpochNumber) -> Result<(), EpochError> {
        let Some(mut epoch) = self.store.epoch_by_number(epoch_number).await? else {
            return Ok(());
        };
        let mut submissions = self.store.epoch_submissions(epoch_number).await?;
        if submissions.is_empty() {
            return Ok(());
        }

        let winner_index = (0..submissions.len())
            .max_by(|&a, &b| {
                let (a, b) = (&submissions[a], &submissions[b]);
                a.matching_bits.cmp(&b.matching_bits).then_with(|| {
                    if self.prefer_earliest_submission {
                        b.confirmed_at.cmp(&a.confirmed_at)
                    } else {
                        b.submission_hash.cmp(&a.submission_hash)
                    }
                })
            })
            .expect("submissions is non-empty");

        for (index, submission) in submissions.iter_mut().enumerate() {
            submission.status = if index == winner_index {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::Rejected
            };
        }
        let winner = submissions[winner_index].clone();

        epoch.proposer = Some(EpochProposer {
            mldsa_pubkey: winner.mldsa_pubkey.clone(),
            legacy_pubkey: winner.legacy_pubkey,
            salt: winner.salt,
            graffiti: winner.graffiti.clone(),
            solution: winner.solution,
        });
        epoch.difficulty_scaled = U256::from(winner.matching_bits);

        self.store
            .replace_epoch_submissions(epoch_number, submissions)
            .await?;
        self.store.upsert_epoch(epoch).await?;
        info!(epoch = %epoch_number, bits = winner.matching_bits, "epoch finalised");
        Ok(())
    }

    fn verify_signature(
        &self,
        payload: &[u8; 32],
        signature: &[u8],
        legacy_pubkey: H256,
    ) -> Result<(), EpochError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| EpochError::BadSignature)?;
        let pubkey = XOnlyPublicKey::from_slice(legacy_pubkey.as_bytes())
            .map_err(|_| EpochError::BadSignature)?;
        let message = Message::from_digest(*payload);
        self.secp
            .verify_schnorr(&signature, &message, &pubkey)
            .map_err(|_| EpochError::BadSignature)
    }
}
