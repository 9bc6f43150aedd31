//! Shared domain types of the OPNet node: block headers, overlay
//! transactions, contracts, receipts, UTXOs, witnesses, epochs, and the
//! canonical hashing rules that bind them together.

use bitcoin::{hashes::Hash, BlockHash, Txid};
use sha2::{Digest, Sha256};

pub use opnet_basic_types::{
    conversions, BlockNumber, EpochNumber, H160, H256, U256,
};

pub mod block;
pub mod contract;
pub mod epoch;
pub mod mempool;
pub mod receipt;
pub mod reorg;
pub mod sync;
pub mod transaction;
pub mod utxo;
pub mod witness;

pub use block::{BlockHeader, ChecksumProof};
pub use contract::Contract;
pub use epoch::{Epoch, EpochProposer, EpochSubmission, SubmissionStatus};
pub use mempool::MempoolEntry;
pub use receipt::{AccessList, ContractEvent, TransactionReceipt};
pub use reorg::ReorgRecord;
pub use sync::SyncStatus;
pub use transaction::{
    DeploymentTransaction, GenericTransaction, InteractionFeatures, InteractionTransaction,
    OverlayTransaction, TransactionBase, TransactionKind, TxInput, TxOutput,
};
pub use utxo::UtxoEntry;
pub use witness::BlockWitness;

/// Gas units granted per satoshi burned.
pub const SAT_TO_GAS_RATIO: u64 = 1_000_000;

/// Hard per-transaction gas ceiling; `sat_to_gas` never exceeds it.
pub const MAX_GAS_PER_TX: u64 = 300_000_000_000;

/// Domain tags for every hash computed by the protocol. Distinct inputs to
/// distinct hashes must never collide across domains.
pub const DOMAIN_CHECKSUM: &[u8] = b"opnet:checksum";
pub const DOMAIN_INDEXING: &[u8] = b"opnet:indexing";
pub const DOMAIN_WITNESS: &[u8] = b"opnet:witness";
pub const DOMAIN_EPOCH_SUBMISSION: &[u8] = b"opnet:epoch-submission";

/// Converts satoshis to gas, clamped to `max_gas`.
pub fn sat_to_gas(sat: u64, max_gas: u64) -> u64 {
    sat.saturating_mul(SAT_TO_GAS_RATIO).min(max_gas)
}

/// Rounds a gas amount up to the next `SAT_TO_GAS_RATIO` boundary. Applied
/// once at the receipt edge; intermediate gas values are never rounded.
pub fn round_up_to_ratio(gas: u64) -> u64 {
    gas.div_ceil(SAT_TO_GAS_RATIO)
        .saturating_mul(SAT_TO_GAS_RATIO)
}

/// Bitcoin txids are displayed in reversed-byte order; internally the node
/// keys everything by the raw 32 bytes.
pub fn txid_to_h256(txid: Txid) -> H256 {
    H256::from_slice(&txid.to_raw_hash().to_byte_array())
}

pub fn h256_to_txid(hash: H256) -> Txid {
    Txid::from_slice(hash.as_bytes()).expect("H256 is always 32 bytes")
}

pub fn block_hash_to_h256(hash: BlockHash) -> H256 {
    H256::from_slice(&hash.to_raw_hash().to_byte_array())
}

pub fn h256_to_block_hash(hash: H256) -> BlockHash {
    BlockHash::from_slice(hash.as_bytes()).expect("H256 is always 32 bytes")
}

/// Hash used to order transactions inside a block: binds the txid to the
/// input index that carried the classification envelope.
pub fn indexing_hash(txid: H256, classification_vin: u32) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_INDEXING);
    hasher.update(txid.as_bytes());
    hasher.update(classification_vin.to_be_bytes());
    H256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sat_to_gas_clamps_to_max() {
        assert_eq!(sat_to_gas(10, MAX_GAS_PER_TX), 10 * SAT_TO_GAS_RATIO);
        assert_eq!(sat_to_gas(u64::MAX, MAX_GAS_PER_TX), MAX_GAS_PER_TX);
    }

    #[test]
    fn gas_rounding_hits_ratio_boundaries() {
        assert_eq!(round_up_to_ratio(0), 0);
        assert_eq!(round_up_to_ratio(1), SAT_TO_GAS_RATIO);
        assert_eq!(round_up_to_ratio(SAT_TO_GAS_RATIO), SAT_TO_GAS_RATIO);
        assert_eq!(
            round_up_to_ratio(SAT_TO_GAS_RATIO + 1),
            2 * SAT_TO_GAS_RATIO
        );
    }

    #[test]
    fn indexing_hash_depends_on_vin() {
        let txid = H256::repeat_byte(0xab);
        assert_ne!(indexing_hash(txid, 0), indexing_hash(txid, 1));
        assert_eq!(indexing_hash(txid, 0), indexing_hash(txid, 0));
    }

    #[test]
    fn txid_round_trip() {
        let hash = H256::repeat_byte(0x42);
        assert_eq!(txid_to_h256(h256_to_txid(hash)), hash);
    }
}
