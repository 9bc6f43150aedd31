//! Per-block state commitment: the storage and receipt Merkle trees, the
//! checksum root chaining, and the membership proofs persisted with every
//! pointer write and receipt.

use std::collections::BTreeMap;

use opnet_basic_types::{BlockNumber, H256};
use opnet_merkle::{MerkleTree, TreeKind};
use opnet_storage::PointerValueRow;
use opnet_types::{BlockHeader, ChecksumProof, TransactionReceipt};

/// Key of the storage tree: contract tweaked key followed by the pointer.
pub fn storage_key(contract: H256, pointer: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(contract.as_bytes());
    key.extend_from_slice(pointer.as_bytes());
    key
}

#[derive(Debug)]
pub struct BlockCommitment {
    pub storage_root: H256,
    pub receipt_root: H256,
    pub checksum_root: H256,
    pub checksum_proofs: Vec<ChecksumProof>,
    pub pointer_rows: Vec<PointerValueRow>,
    /// Input receipts with `proofs` populated from the receipt tree.
    pub receipts: Vec<TransactionReceipt>,
}

/// Builds both trees and the chained checksum for one block.
///
/// `writes` is the block-wide last-write-wins pointer map produced by the
/// executor; `receipts` arrive in execution order.
pub fn commit_block_state(
    height: BlockNumber,
    block_hash: H256,
    prev_checksum: H256,
    merkle_root: H256,
    writes: &BTreeMap<(H256, H256), H256>,
    mut receipts: Vec<TransactionReceipt>,
) -> BlockCommitment {
    let storage_tree = MerkleTree::from_entries(
        TreeKind::Storage,
        writes.iter().map(|(&(contract, pointer), value)| {
            (storage_key(contract, pointer), value.as_bytes().to_vec())
        }),
    );
    let storage_root = storage_tree.root();

    let pointer_rows = writes
        .iter()
        .map(|(&(contract, pointer), &value)| {
            let key = storage_key(contract, pointer);
            let proof = storage_tree
                .prove(&key)
                .expect("every written key is a leaf of the tree just built");
            PointerValueRow {
                contract,
                pointer,
                value,
                last_seen_at: height,
                proof,
            }
        })
        .collect();

    let receipt_tree = MerkleTree::from_entries(
        TreeKind::Receipt,
        receipts.iter().map(|receipt| {
            (receipt.tree_key(), receipt.receipt_hash().as_bytes().to_vec())
        }),
    );
    let receipt_root = receipt_tree.root();
    for receipt in &mut receipts {
        if let Some(proof) = receipt_tree.prove(&receipt.tree_key()) {
            receipt.proofs = proof.siblings;
        }
    }

    let checksum_root = BlockHeader::compute_checksum_root(
        prev_checksum,
        storage_root,
        receipt_root,
        merkle_root,
        height,
        block_hash,
    );

    BlockCommitment {
        storage_root,
        receipt_root,
        checksum_root,
        checksum_proofs: checksum_proofs(
            prev_checksum,
            storage_root,
            receipt_root,
            merkle_root,
            block_hash,
        ),
        pointer_rows,
        receipts,
    }
}

/// Membership proofs for the checksum components, indexed in commitment
/// order.
fn checksum_proofs(
    prev_checksum: H256,
    storage_root: H256,
    receipt_root: H256,
    merkle_root: H256,
    block_hash: H256,
) -> Vec<ChecksumProof> {
    let components = [
        prev_checksum,
        storage_root,
        receipt_root,
        merkle_root,
        block_hash,
    ];
    let tree = MerkleTree::from_entries(
        TreeKind::Checksum,
        components
            .iter()
            .enumerate()
            .map(|(index, component)| {
                ((index as u32).to_be_bytes().to_vec(), component.as_bytes().to_vec())
            }),
    );

    components
        .iter()
        .enumerate()
        .filter_map(|(index, _)| {
            tree.prove(&(index as u32).to_be_bytes())
                .map(|proof| ChecksumProof {
                    index: index as u32,
                    hashes: proof.siblings,
                })
        })
        .collect()
}
