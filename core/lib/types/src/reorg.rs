use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BlockNumber;

/// Record of one chain reorganisation: heights `from_block` (exclusive, the
/// fork point) through `to_block` (inclusive) were unwound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgRecord {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub timestamp: DateTime<Utc>,
}
