use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlockNumber, H256};

/// A deployed contract. Unique by both `contract_address` and
/// `tweaked_pubkey`; never destroyed, only unwound by a reorg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// P2TR address of the contract's two-leaf taproot tree.
    pub contract_address: String,
    /// X-only output key of that tree; storage keys derive from it.
    pub tweaked_pubkey: H256,
    /// X-only key of the deploying wallet.
    pub deployer: H256,
    pub bytecode: Vec<u8>,
    pub bytecode_hash: H256,
    pub deployment_txid: H256,
    pub deployment_height: BlockNumber,
}

impl Contract {
    pub fn bytecode_hash_of(bytecode: &[u8]) -> H256 {
        H256::from_slice(&Sha256::digest(bytecode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytecode_hash_is_stable() {
        let code = b"\x00\x01\x02";
        assert_eq!(Contract::bytecode_hash_of(code), Contract::bytecode_hash_of(code));
        assert_ne!(Contract::bytecode_hash_of(code), Contract::bytecode_hash_of(b"\x00"));
    }
}
