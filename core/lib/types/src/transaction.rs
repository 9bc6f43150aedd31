use serde::{Deserialize, Serialize};

use crate::{BlockNumber, H256};

/// Classification of a base-chain transaction by the parser chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Generic,
    Deployment,
    Interaction,
}

/// One spent input of an overlay transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: H256,
    pub prev_vout: u32,
    /// Witness stack items, kept for the classification input so the
    /// envelope can be re-parsed from the stored document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witness: Vec<Vec<u8>>,
}

/// One output of an overlay transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    /// Decoded destination, when the script maps to a known address form.
    pub address: Option<String>,
}

/// Fields common to every classified transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBase {
    pub txid: H256,
    pub indexing_hash: H256,
    pub block_height: BlockNumber,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Consensus serialization of the base-chain transaction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericTransaction {
    pub base: TransactionBase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTransaction {
    pub base: TransactionBase,
    /// X-only key of the deploying wallet; internal key of the contract's
    /// taproot tree.
    pub deployer_pubkey: H256,
    pub salt_pubkey: H256,
    pub salt: H256,
    pub bytecode: Vec<u8>,
    /// Derived P2TR destination; must equal the on-chain deployment output.
    pub contract_address: String,
    pub contract_tweaked_pubkey: H256,
}

/// Feature bits carried by an interaction envelope.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InteractionFeatures(pub u32);

impl InteractionFeatures {
    pub const ACCESS_LIST: Self = Self(1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionTransaction {
    pub base: TransactionBase,
    /// X-only key of the caller wallet, taken from the envelope leaf.
    pub from_pubkey: H256,
    pub contract_tweaked_pubkey: H256,
    pub contract_address: String,
    pub calldata: Vec<u8>,
    pub theoretical_gas_limit: u64,
    pub priority_fee: u64,
    pub features: InteractionFeatures,
}

/// A base-chain transaction as interpreted by the overlay protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OverlayTransaction {
    Generic(GenericTransaction),
    Deployment(DeploymentTransaction),
    Interaction(InteractionTransaction),
}

impl OverlayTransaction {
    pub fn base(&self) -> &TransactionBase {
        match self {
            Self::Generic(tx) => &tx.base,
            Self::Deployment(tx) => &tx.base,
            Self::Interaction(tx) => &tx.base,
        }
    }

    pub fn txid(&self) -> H256 {
        self.base().txid
    }

    pub fn indexing_hash(&self) -> H256 {
        self.base().indexing_hash
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Generic(_) => TransactionKind::Generic,
            Self::Deployment(_) => TransactionKind::Deployment,
            Self::Interaction(_) => TransactionKind::Interaction,
        }
    }

    /// Fee burned for ordering purposes. Only interactions bid for position;
    /// deployments and generic transactions sort on dependencies alone.
    pub fn priority_fee(&self) -> u64 {
        match self {
            Self::Interaction(tx) => tx.priority_fee,
            _ => 0,
        }
    }

    pub fn is_executable(&self) -> bool {
        !matches!(self, Self::Generic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing_hash;

    fn base(txid_byte: u8) -> TransactionBase {
        let txid = H256::repeat_byte(txid_byte);
        TransactionBase {
            txid,
            indexing_hash: indexing_hash(txid, 0),
            block_height: BlockNumber(100),
            inputs: vec![],
            outputs: vec![],
            raw: vec![],
        }
    }

    #[test]
    fn classification_tag_round_trips_through_json() {
        let tx = OverlayTransaction::Generic(GenericTransaction { base: base(1) });
        let encoded = serde_json::to_string(&tx).unwrap();
        assert!(encoded.contains("\"kind\":\"generic\""));
        let decoded: OverlayTransaction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn features_bitset() {
        let features = InteractionFeatures(1);
        assert!(features.contains(InteractionFeatures::ACCESS_LIST));
        assert!(!InteractionFeatures::default().contains(InteractionFeatures::ACCESS_LIST));
    }

    #[test]
    fn priority_fee_only_counts_for_interactions() {
        let tx = OverlayTransaction::Interaction(InteractionTransaction {
            base: base(2),
            from_pubkey: H256::zero(),
            contract_tweaked_pubkey: H256::zero(),
            contract_address: String::new(),
            calldata: vec![],
            theoretical_gas_limit: 0,
            priority_fee: 77,
            features: InteractionFeatures::default(),
        });
        assert_eq!(tx.priority_fee(), 77);
        let generic = OverlayTransaction::Generic(GenericTransaction { base: base(3) });
        assert_eq!(generic.priority_fee(), 0);
    }
}
