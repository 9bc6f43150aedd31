use serde::{Deserialize, Serialize};

use crate::{BlockNumber, H256};

/// One unspent (or historically spent) transaction output tracked by the
/// node. `deleted_at_block` is set when an input consumes the output and
/// cleared again if a reorg resurrects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub txid: H256,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub address: Option<String>,
    pub block_height: BlockNumber,
    pub deleted_at_block: Option<BlockNumber>,
}

impl UtxoEntry {
    pub fn is_live(&self) -> bool {
        self.deleted_at_block.is_none()
    }

    pub fn outpoint(&self) -> (H256, u32) {
        (self.txid, self.vout)
    }
}
