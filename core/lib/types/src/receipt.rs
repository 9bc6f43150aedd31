use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::H256;

/// Pointers touched per contract during execution; reported in receipts and
/// used to pre-warm access for `ACCESS_LIST` interactions.
pub type AccessList = BTreeMap<H256, BTreeSet<H256>>;

/// An event emitted by a contract during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEvent {
    /// Tweaked key of the emitting contract.
    pub contract: H256,
    pub data: Vec<u8>,
}

/// Outcome of executing one overlay transaction. Exactly one of `result`
/// and `revert` is set; a reverted transaction leaves no storage writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub txid: H256,
    pub receipt_index: u32,
    pub result: Option<Vec<u8>>,
    pub revert: Option<String>,
    pub events: Vec<ContractEvent>,
    pub gas_used: u64,
    pub access_list: AccessList,
    /// Addresses of contracts deployed during this execution.
    pub deployed_contracts: Vec<String>,
    /// Membership proof against the block's receipt root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proofs: Vec<H256>,
}

impl TransactionReceipt {
    /// Canonical hash committed into the receipt tree.
    pub fn receipt_hash(&self) -> H256 {
        let mut hasher = Sha256::new();
        hasher.update(self.txid.as_bytes());
        hasher.update(self.receipt_index.to_be_bytes());
        match (&self.result, &self.revert) {
            (Some(result), _) => {
                hasher.update([1u8]);
                hasher.update(result);
            }
            (None, Some(reason)) => {
                hasher.update([2u8]);
                hasher.update(reason.as_bytes());
            }
            (None, None) => hasher.update([0u8]),
        }
        hasher.update(self.gas_used.to_be_bytes());
        for event in &self.events {
            hasher.update(event.contract.as_bytes());
            hasher.update((event.data.len() as u32).to_be_bytes());
            hasher.update(&event.data);
        }
        H256::from_slice(&hasher.finalize())
    }

    /// Canonical receipt-tree key for `(txid, receipt_index)`.
    pub fn tree_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(self.txid.as_bytes());
        key.extend_from_slice(&self.receipt_index.to_be_bytes());
        key
    }
}
