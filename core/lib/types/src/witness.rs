use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlockNumber, DOMAIN_WITNESS, H256};

/// A validator signature over a block's checksum root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWitness {
    pub block_number: BlockNumber,
    /// BIP340 schnorr signature bytes.
    pub signature: Vec<u8>,
    /// X-only public key of the signer.
    pub pubkey: H256,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proofs: Option<Vec<H256>>,
    /// Whether the signer belongs to the configured trusted set.
    pub trusted: bool,
}

/// Message digest that validators sign for a given checksum root.
pub fn witness_digest(checksum_root: H256) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_WITNESS);
    hasher.update(checksum_root.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_differs_per_root() {
        assert_ne!(
            witness_digest(H256::repeat_byte(1)),
            witness_digest(H256::repeat_byte(2))
        );
    }
}
