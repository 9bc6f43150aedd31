use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    transaction::{TransactionKind, TxInput, TxOutput},
    H256,
};

/// A transaction (or PSBT) admitted to the mempool. Unique by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub id: H256,
    pub first_seen: DateTime<Utc>,
    pub psbt: bool,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub raw: Vec<u8>,
    pub priority_fee: u64,
    pub theoretical_gas_limit: u64,
    pub kind: TransactionKind,
    /// Sender address, when the classification exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<Vec<u8>>,
}

impl MempoolEntry {
    /// Addresses credited by this entry's outputs; feeds the per-address
    /// secondary index.
    pub fn output_addresses(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .filter_map(|output| output.address.as_deref())
    }

    pub fn byte_size(&self) -> usize {
        self.raw.len()
    }
}
