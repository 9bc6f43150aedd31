//! Wire types of the `btc` namespace. All field names are camelCase; hashes
//! and byte blobs travel as `0x`-prefixed hex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use opnet_basic_types::{H160, H256};

/// Height selector accepting decimal, hex, or the sentinel `-1` (latest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Height(u64),
}

impl BlockTag {
    pub fn height(self) -> Option<u64> {
        match self {
            Self::Latest => None,
            Self::Height(height) => Some(height),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Latest => serializer.serialize_i64(-1),
            Self::Height(height) => serializer.serialize_u64(*height),
        }
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(-1) => Ok(Self::Latest),
            Raw::Number(height) if height >= 0 => Ok(Self::Height(height as u64)),
            Raw::Number(other) => Err(serde::de::Error::custom(format!(
                "invalid block height {other}"
            ))),
            Raw::Text(text) => {
                let trimmed = text.trim();
                if trimmed == "-1" || trimmed.eq_ignore_ascii_case("latest") {
                    return Ok(Self::Latest);
                }
                let parsed = if let Some(hex_digits) =
                    trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
                {
                    u64::from_str_radix(hex_digits, 16)
                } else {
                    trimmed.parse::<u64>()
                };
                parsed
                    .map(Self::Height)
                    .map_err(|_| serde::de::Error::custom(format!("invalid block height {text:?}")))
            }
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn u64_to_hex(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn from_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(text.trim_start_matches("0x").trim_start_matches("0X"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumProofResponse {
    pub index: u32,
    pub hashes: Vec<H256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderResponse {
    pub height: String,
    pub hash: H256,
    pub previous_block_hash: H256,
    pub previous_block_checksum: H256,
    pub merkle_root: H256,
    pub storage_root: H256,
    pub receipt_root: H256,
    pub checksum_root: H256,
    pub checksum_proofs: Vec<ChecksumProofResponse>,
    pub tx_count: u32,
    pub ema: String,
    pub base_gas: String,
    pub bits: String,
    pub nonce: u32,
    pub version: i32,
    pub size: u64,
    pub weight: u64,
    pub stripped_size: u64,
    pub time: u32,
    pub median_time: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    #[serde(flatten)]
    pub header: BlockHeaderResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionResponse>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInputResponse {
    pub transaction_id: H256,
    pub output_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutputResponse {
    pub value: u64,
    pub script_pub_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: H256,
    pub hash: H256,
    pub block_height: String,
    pub kind: String,
    pub inputs: Vec<TransactionInputResponse>,
    pub outputs: Vec<TransactionOutputResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calldata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_fee: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub contract: H256,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub receipt: Option<String>,
    pub receipt_proofs: Vec<H256>,
    pub events: Vec<EventResponse>,
    pub gas_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub deployed_contracts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_transaction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub to: String,
    pub calldata: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<BlockTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum SimulateResponse {
    Failure {
        error: String,
    },
    Success {
        result: String,
        events: Vec<EventResponse>,
        access_list: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoResponse {
    pub transaction_id: H256,
    pub output_index: u32,
    pub value: u64,
    pub script_pub_key: String,
    pub block_height: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxosResponse {
    pub confirmed: Vec<UtxoResponse>,
    pub spent_transactions: Vec<UtxoResponse>,
    pub pending: Vec<UtxoResponse>,
    pub raw: Vec<UtxoResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeResponse {
    pub bytecode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_tweaked_public_key: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployer: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_height: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageValueResponse {
    pub pointer: H256,
    pub value: H256,
    pub height: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proofs: Option<StorageProofResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProofResponse {
    pub index: u32,
    pub total: u32,
    pub siblings: Vec<H256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessResponse {
    pub block_number: String,
    pub signature: String,
    pub pubkey: H256,
    pub timestamp: DateTime<Utc>,
    pub trusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorgResponse {
    pub from_block: String,
    pub to_block: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolInfoResponse {
    pub count: usize,
    pub opnet_count: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransactionResponse {
    pub id: H256,
    pub first_seen: DateTime<Utc>,
    pub psbt: bool,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub priority_fee: String,
    pub theoretical_gas_limit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochProposerResponse {
    pub mldsa_public_key: String,
    pub legacy_public_key: H256,
    pub salt: H256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graffiti: Option<String>,
    pub solution: H160,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochResponse {
    pub epoch_number: String,
    pub epoch_hash: H256,
    pub start_block: String,
    pub end_block: String,
    pub epoch_target: H256,
    pub target_hash: H160,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposer: Option<EpochProposerResponse>,
    pub difficulty_scaled: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochTemplateResponse {
    pub epoch_number: String,
    pub epoch_target: H256,
    pub target_hash: H160,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEpochRequest {
    pub epoch_number: BlockTag,
    pub target_hash: H160,
    pub salt: H256,
    pub mldsa_public_key: String,
    pub legacy_public_key: H256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graffiti: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEpochResponse {
    pub status: String,
    pub submission_hash: H256,
    pub difficulty: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Topics a WebSocket client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionTopic {
    NewBlocks,
    NewTransactions,
    NewEpochs,
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum SubscriptionEvent {
    NewBlock {
        height: String,
        hash: H256,
        checksum_root: H256,
    },
    NewTransaction {
        id: H256,
    },
    NewEpoch {
        epoch_number: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_tag_accepts_decimal_hex_and_latest() {
        let cases = [
            ("123", BlockTag::Height(123)),
            ("\"123\"", BlockTag::Height(123)),
            ("\"0x7b\"", BlockTag::Height(123)),
            ("-1", BlockTag::Latest),
            ("\"-1\"", BlockTag::Latest),
            ("\"latest\"", BlockTag::Latest),
        ];
        for (raw, expected) in cases {
            let parsed: BlockTag = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, expected, "case {raw}");
        }
        assert!(serde_json::from_str::<BlockTag>("-2").is_err());
        assert!(serde_json::from_str::<BlockTag>("\"0xzz\"").is_err());
    }

    #[test]
    fn subscription_event_wire_shape() {
        let event = SubscriptionEvent::NewBlock {
            height: "0x10".to_string(),
            hash: H256::repeat_byte(1),
            checksum_root: H256::repeat_byte(2),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "newBlock");
        assert_eq!(encoded["data"]["height"], "0x10");
    }

    #[test]
    fn hex_round_trip() {
        assert_eq!(to_hex(&[0xde, 0xad]), "0xdead");
        assert_eq!(from_hex("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(from_hex("dead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(u64_to_hex(255), "0xff");
    }
}
