//! Deterministic binary Merkle trees used for the per-block storage and
//! receipt commitments.
//!
//! Leaves are `(key, value)` pairs hashed with a per-tree domain tag; inner
//! nodes hash their children pairwise, promoting an odd trailing node to the
//! next level unchanged. Building the same entry set in any insertion order
//! yields the same root, because entries are sorted by key before hashing.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use opnet_basic_types::H256;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Root of the frozen empty storage tree.
pub static EMPTY_STORAGE_ROOT: Lazy<H256> =
    Lazy::new(|| MerkleTree::new(TreeKind::Storage).root());

/// Root of the frozen empty receipt tree.
pub static EMPTY_RECEIPT_ROOT: Lazy<H256> =
    Lazy::new(|| MerkleTree::new(TreeKind::Receipt).root());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeKind {
    Storage,
    Receipt,
    /// Small per-header tree over the checksum components.
    Checksum,
}

impl TreeKind {
    fn domain_tag(self) -> &'static [u8] {
        match self {
            Self::Storage => b"opnet:storage",
            Self::Receipt => b"opnet:receipt",
            Self::Checksum => b"opnet:checksum-components",
        }
    }
}

/// Membership proof for one leaf. `index` and `total` pin the leaf position
/// so the audit path can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u32,
    pub total: u32,
    pub siblings: Vec<H256>,
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    kind: TreeKind,
    /// Sorted by key; unique keys (last write wins is applied by callers).
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    levels: Vec<Vec<H256>>,
}

impl MerkleTree {
    pub fn new(kind: TreeKind) -> Self {
        Self::from_entries(kind, std::iter::empty())
    }

    /// Builds the tree over the given entries. Duplicate keys keep the last
    /// occurrence.
    pub fn from_entries(
        kind: TreeKind,
        entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| {
            // `dedup_by` keeps the *first* of each run; swap so the latest
            // write for a key survives.
            if a.0 == b.0 {
                std::mem::swap(&mut a.1, &mut b.1);
                true
            } else {
                false
            }
        });

        let leaves: Vec<H256> = entries
            .iter()
            .map(|(key, value)| leaf_hash(kind, key, value))
            .collect();
        let levels = build_levels(kind, leaves);

        Self {
            kind,
            entries,
            levels,
        }
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> H256 {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => *root,
            None => empty_root(self.kind),
        }
    }

    /// Membership proof for `key`, or `None` if the key is absent.
    pub fn prove(&self, key: &[u8]) -> Option<MerkleProof> {
        let index = self
            .entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()?;

        let mut siblings = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling = if position % 2 == 0 {
                position + 1
            } else {
                position - 1
            };
            if let Some(hash) = level.get(sibling) {
                siblings.push(*hash);
            }
            position /= 2;
        }

        Some(MerkleProof {
            index: index as u32,
            total: self.entries.len() as u32,
            siblings,
        })
    }
}

/// Verifies a membership proof produced by [`MerkleTree::prove`].
pub fn verify(root: H256, kind: TreeKind, key: &[u8], value: &[u8], proof: &MerkleProof) -> bool {
    if proof.total == 0 || proof.index >= proof.total {
        return false;
    }

    let mut hash = leaf_hash(kind, key, value);
    let mut position = proof.index as usize;
    let mut width = proof.total as usize;
    let mut siblings = proof.siblings.iter();

    while width > 1 {
        if position % 2 == 0 {
            if position + 1 < width {
                let Some(sibling) = siblings.next() else {
                    return false;
                };
                hash = node_hash(kind, hash, *sibling);
            }
            // An odd trailing node is promoted without a sibling.
        } else {
            let Some(sibling) = siblings.next() else {
                return false;
            };
            hash = node_hash(kind, *sibling, hash);
        }
        position /= 2;
        width = width / 2 + width % 2;
    }

    siblings.next().is_none() && hash == root
}

pub fn empty_root(kind: TreeKind) -> H256 {
    H256::from_slice(&Sha256::digest(kind.domain_tag()))
}

fn leaf_hash(kind: TreeKind, key: &[u8], value: &[u8]) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(kind.domain_tag());
    hasher.update([LEAF_PREFIX]);
    hasher.update((key.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    H256::from_slice(&hasher.finalize())
}

fn node_hash(kind: TreeKind, left: H256, right: H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(kind.domain_tag());
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    H256::from_slice(&hasher.finalize())
}

fn build_levels(kind: TreeKind, leaves: Vec<H256>) -> Vec<Vec<H256>> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut levels = vec![leaves];
    while levels.last().map_or(false, |level| level.len() > 1) {
        let current = levels.last().expect("levels is non-empty");
        let mut next = Vec::with_capacity(current.len() / 2 + 1);
        for pair in current.chunks(2) {
            match pair {
                [left, right] => next.push(node_hash(kind, *left, *right)),
                [odd] => next.push(*odd),
                _ => unreachable!("chunks(2) yields 1- or 2-element slices"),
            }
        }
        levels.push(next);
    }
    levels
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    use super::*;

    fn entry(key_byte: u8, value_byte: u8) -> (Vec<u8>, Vec<u8>) {
        (vec![key_byte; 64], vec![value_byte; 32])
    }

    #[test]
    fn empty_roots_are_distinct_constants() {
        assert_ne!(*EMPTY_STORAGE_ROOT, *EMPTY_RECEIPT_ROOT);
        assert_eq!(MerkleTree::new(TreeKind::Storage).root(), *EMPTY_STORAGE_ROOT);
        assert_eq!(MerkleTree::new(TreeKind::Receipt).root(), *EMPTY_RECEIPT_ROOT);
    }

    #[test]
    fn root_is_insertion_order_independent() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut entries: Vec<_> = (0u8..37).map(|i| entry(i, i.wrapping_mul(3))).collect();
        let tree = MerkleTree::from_entries(TreeKind::Storage, entries.clone());

        entries.shuffle(&mut rng);
        let shuffled = MerkleTree::from_entries(TreeKind::Storage, entries);
        assert_eq!(tree.root(), shuffled.root());
    }

    #[test]
    fn duplicate_keys_keep_last_write() {
        let tree = MerkleTree::from_entries(
            TreeKind::Storage,
            vec![entry(1, 10), entry(1, 20)],
        );
        let reference =
            MerkleTree::from_entries(TreeKind::Storage, vec![entry(1, 20)]);
        assert_eq!(tree.root(), reference.root());
    }

    #[test]
    fn proofs_verify_for_every_leaf_at_odd_sizes() {
        for size in [1usize, 2, 3, 5, 8, 13, 21] {
            let entries: Vec<_> = (0..size as u8).map(|i| entry(i, i)).collect();
            let tree = MerkleTree::from_entries(TreeKind::Receipt, entries.clone());
            let root = tree.root();

            for (key, value) in &entries {
                let proof = tree.prove(key).expect("leaf exists");
                assert!(
                    verify(root, TreeKind::Receipt, key, value, &proof),
                    "size {size} failed"
                );
            }
        }
    }

    #[test]
    fn proof_rejects_wrong_value_and_wrong_root() {
        let entries: Vec<_> = (0u8..6).map(|i| entry(i, i)).collect();
        let tree = MerkleTree::from_entries(TreeKind::Storage, entries.clone());
        let root = tree.root();
        let (key, _) = &entries[2];
        let proof = tree.prove(key).unwrap();

        assert!(!verify(root, TreeKind::Storage, key, &[0xff; 32], &proof));
        assert!(!verify(
            H256::repeat_byte(0xee),
            TreeKind::Storage,
            key,
            &entries[2].1,
            &proof
        ));
        // Kind mismatch must also fail: the domains are separated.
        assert!(!verify(root, TreeKind::Receipt, key, &entries[2].1, &proof));
    }

    #[test]
    fn prove_missing_key_returns_none() {
        let tree = MerkleTree::from_entries(TreeKind::Storage, vec![entry(1, 1)]);
        assert!(tree.prove(&[9u8; 64]).is_none());
    }

    #[test]
    fn random_mutation_breaks_proof() {
        let mut rng = StdRng::seed_from_u64(42);
        let entries: Vec<_> = (0u8..17).map(|i| entry(i, i)).collect();
        let tree = MerkleTree::from_entries(TreeKind::Storage, entries.clone());
        let root = tree.root();
        let (key, value) = &entries[9];
        let mut proof = tree.prove(key).unwrap();

        if !proof.siblings.is_empty() {
            let victim = rng.gen_range(0..proof.siblings.len());
            proof.siblings[victim] = H256::repeat_byte(0xcc);
            assert!(!verify(root, TreeKind::Storage, key, value, &proof));
        }
    }
}
