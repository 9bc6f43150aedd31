use serde::{Deserialize, Serialize};

use crate::{BlockNumber, H256};

/// Progress snapshot of the block pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub current: BlockNumber,
    pub target: BlockNumber,
    pub is_syncing: bool,
    pub is_reorging: bool,
    pub best_hash: H256,
}

impl SyncStatus {
    pub fn synced_at(height: BlockNumber, best_hash: H256) -> Self {
        Self {
            current: height,
            target: height,
            is_syncing: false,
            is_reorging: false,
            best_hash,
        }
    }
}
