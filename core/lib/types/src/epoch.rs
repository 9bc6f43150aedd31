use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::{BlockNumber, EpochNumber, DOMAIN_EPOCH_SUBMISSION, H160, H256, U256};

/// Default number of base-chain heights per mining epoch; overridable per
/// network through the consensus configuration.
pub const BLOCKS_PER_EPOCH: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// The winning proposer recorded into a closed epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochProposer {
    /// Post-quantum identity bytes; opaque to the node, hashed into the
    /// solution.
    pub mldsa_pubkey: Vec<u8>,
    /// X-only secp256k1 key the submission signature verifies against.
    pub legacy_pubkey: H256,
    pub salt: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graffiti: Option<Vec<u8>>,
    /// `sha1(mldsa_pubkey ‖ salt)`.
    pub solution: H160,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_number: EpochNumber,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    /// Checksum root of the epoch's start header.
    pub epoch_target: H256,
    /// `sha1(epoch_target)`; the 160-bit value solutions are matched against.
    pub target_hash: H160,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer: Option<EpochProposer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proofs: Vec<H256>,
    pub difficulty_scaled: U256,
}

impl Epoch {
    pub fn target_hash_of(epoch_target: H256) -> H160 {
        H160::from_slice(&Sha1::digest(epoch_target.as_bytes()))
    }

    /// Identity hash the epoch is addressable by.
    pub fn epoch_hash(&self) -> H256 {
        let mut hasher = Sha256::new();
        hasher.update(self.epoch_number.0.to_be_bytes());
        hasher.update(self.epoch_target.as_bytes());
        hasher.update(self.target_hash.as_bytes());
        H256::from_slice(&hasher.finalize())
    }
}

/// A mining submission received for an open epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSubmission {
    pub epoch_number: EpochNumber,
    pub submission_hash: H256,
    pub mldsa_pubkey: Vec<u8>,
    pub legacy_pubkey: H256,
    pub salt: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graffiti: Option<Vec<u8>>,
    pub signature: Vec<u8>,
    pub solution: H160,
    pub matching_bits: u32,
    pub status: SubmissionStatus,
    pub confirmed_at: DateTime<Utc>,
}

impl EpochSubmission {
    /// `sha1(mldsa_pubkey ‖ salt)`, the candidate value compared against
    /// the epoch target hash.
    pub fn solution_of(mldsa_pubkey: &[u8], salt: H256) -> H160 {
        let mut hasher = Sha1::new();
        hasher.update(mldsa_pubkey);
        hasher.update(salt.as_bytes());
        H160::from_slice(&hasher.finalize())
    }

    /// Canonical bytes covered by the submission signature.
    pub fn signing_payload(
        epoch_number: EpochNumber,
        target_hash: H160,
        salt: H256,
        mldsa_pubkey: &[u8],
        graffiti: Option<&[u8]>,
    ) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_EPOCH_SUBMISSION);
        hasher.update(epoch_number.0.to_be_bytes());
        hasher.update(target_hash.as_bytes());
        hasher.update(salt.as_bytes());
        hasher.update((mldsa_pubkey.len() as u32).to_be_bytes());
        hasher.update(mldsa_pubkey);
        if let Some(graffiti) = graffiti {
            hasher.update(graffiti);
        }
        hasher.finalize().into()
    }
}

/// Count of leading equal bits between two 160-bit digests.
pub fn matching_bits(a: H160, b: H160) -> u32 {
    let mut bits = 0;
    for (lhs, rhs) in a.as_bytes().iter().zip(b.as_bytes()) {
        let diff = lhs ^ rhs;
        if diff == 0 {
            bits += 8;
        } else {
            bits += diff.leading_zeros();
            break;
        }
    }
    bits
}
