use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlockNumber, DOMAIN_CHECKSUM, H256, U256};

/// Membership proof for one component of the block checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumProof {
    pub index: u32,
    pub hashes: Vec<H256>,
}

/// Committed header of an indexed base-chain block, extended with the
/// overlay commitment roots. `checksum_root` values of consecutive heights
/// form a linear chain via `prev_checksum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: BlockNumber,
    pub hash: H256,
    pub prev_hash: H256,
    pub prev_checksum: H256,
    /// Base-chain transaction Merkle root.
    pub merkle_root: H256,
    pub storage_root: H256,
    pub receipt_root: H256,
    pub checksum_root: H256,
    pub checksum_proofs: Vec<ChecksumProof>,
    pub tx_count: u32,
    /// Difficulty/fee smoothing EMA carried between blocks.
    pub ema: u128,
    pub base_gas: U256,
    pub bits: u32,
    pub nonce: u32,
    pub version: i32,
    pub size: u64,
    pub weight: u64,
    pub stripped_size: u64,
    pub time: u32,
    pub median_time: u32,
}

impl BlockHeader {
    /// Computes the checksum root binding this header to its predecessor.
    ///
    /// The checksum commits to the previous checksum, both overlay roots,
    /// the base-chain Merkle root, and the height/hash pair, so a single
    /// 32-byte value pins the whole chain of committed state.
    pub fn compute_checksum_root(
        prev_checksum: H256,
        storage_root: H256,
        receipt_root: H256,
        merkle_root: H256,
        height: BlockNumber,
        block_hash: H256,
    ) -> H256 {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_CHECKSUM);
        hasher.update(prev_checksum.as_bytes());
        hasher.update(storage_root.as_bytes());
        hasher.update(receipt_root.as_bytes());
        hasher.update(merkle_root.as_bytes());
        hasher.update(height.0.to_be_bytes());
        hasher.update(block_hash.as_bytes());
        H256::from_slice(&hasher.finalize())
    }

    /// Re-derives the checksum root from the header's own fields.
    pub fn expected_checksum_root(&self) -> H256 {
        Self::compute_checksum_root(
            self.prev_checksum,
            self.storage_root,
            self.receipt_root,
            self.merkle_root,
            self.height,
            self.hash,
        )
    }
}
