//! Classification of base-chain transactions into overlay transactions.
//!
//! The parser chain tries `Deployment`, then `Interaction`, and falls back
//! to `Generic`. Only the first input's witness stack is examined: a
//! classified transaction reveals a tapscript envelope there (signature,
//! leaf script, control block). Classification is a total, deterministic
//! function of the raw transaction.

use bitcoin::{
    script::Instruction,
    secp256k1::{All, Secp256k1},
    taproot::ControlBlock,
    Address, Network, ScriptBuf, Transaction, TxIn, XOnlyPublicKey,
};
use tracing::{debug, instrument, warn};

use opnet_basic_types::{BlockNumber, H256};
use opnet_types::{
    indexing_hash, sat_to_gas, txid_to_h256, DeploymentTransaction, GenericTransaction,
    InteractionFeatures, InteractionTransaction, OverlayTransaction, TransactionBase, TxInput,
    TxOutput, MAX_GAS_PER_TX,
};

use crate::script::{
    address_for_tweaked_key, ContractScriptBuilder, DEPLOY_TAG, INTERACT_TAG, PROTOCOL_MAGIC,
};

const MIN_WITNESS_LENGTH: usize = 3;
const MIN_DEPLOYMENT_INSTRUCTIONS: usize = 6;
const MIN_INTERACTION_INSTRUCTIONS: usize = 7;

/// Input index whose witness carries the classification envelope.
const CLASSIFICATION_VIN: u32 = 0;

#[derive(Debug)]
pub struct TransactionParser {
    network: Network,
    secp: Secp256k1<All>,
}

impl TransactionParser {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            secp: Secp256k1::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Classifies one transaction. Never fails: anything that does not
    /// decode as a valid deployment or interaction envelope is `Generic`.
    #[instrument(skip(self, tx), target = "btc_client::parser")]
    pub fn parse_transaction(
        &self,
        tx: &Transaction,
        block_height: BlockNumber,
    ) -> OverlayTransaction {
        let base = self.transaction_base(tx, block_height);

        let Some(envelope) = tx.input.first().and_then(Envelope::decode) else {
            return OverlayTransaction::Generic(GenericTransaction { base });
        };

        let instructions: Vec<_> = envelope
            .leaf_script
            .instructions()
            .filter_map(Result::ok)
            .collect();
        let Some(magic_index) = find_protocol_magic(&instructions) else {
            return OverlayTransaction::Generic(GenericTransaction { base });
        };
        let body = &instructions[magic_index..];

        if let Some(deployment) = self.parse_deployment(tx, &envelope, &instructions, body, &base)
        {
            debug!("Parsed deployment transaction");
            return OverlayTransaction::Deployment(deployment);
        }
        if let Some(interaction) = self.parse_interaction(&envelope, &instructions, body, &base) {
            debug!("Parsed interaction transaction");
            return OverlayTransaction::Interaction(interaction);
        }

        OverlayTransaction::Generic(GenericTransaction { base })
    }

    fn transaction_base(&self, tx: &Transaction, block_height: BlockNumber) -> TransactionBase {
        let txid = txid_to_h256(tx.compute_txid());
        let inputs = tx
            .input
            .iter()
            .enumerate()
            .map(|(index, input)| TxInput {
                prev_txid: txid_to_h256(input.previous_output.txid),
                prev_vout: input.previous_output.vout,
                witness: if index as u32 == CLASSIFICATION_VIN {
                    input.witness.iter().map(<[u8]>::to_vec).collect()
                } else {
                    Vec::new()
                },
            })
            .collect();
        let outputs = tx
            .output
            .iter()
            .map(|output| TxOutput {
                value: output.value.to_sat(),
                script_pubkey: output.script_pubkey.to_bytes(),
                address: Address::from_script(&output.script_pubkey, self.network)
                    .ok()
                    .map(|address| address.to_string()),
            })
            .collect();

        TransactionBase {
            txid,
            indexing_hash: indexing_hash(txid, CLASSIFICATION_VIN),
            block_height,
            inputs,
            outputs,
            raw: bitcoin::consensus::serialize(tx),
        }
    }

    #[instrument(skip_all, target = "btc_client::parser")]
    fn parse_deployment(
        &self,
        tx: &Transaction,
        envelope: &Envelope,
        instructions: &[Instruction<'_>],
        body: &[Instruction<'_>],
        base: &TransactionBase,
    ) -> Option<DeploymentTransaction> {
        if body.len() < MIN_DEPLOYMENT_INSTRUCTIONS {
            return None;
        }
        if !push_matches(body.get(1)?, DEPLOY_TAG.as_bytes()) {
            return None;
        }

        // The deployer key is the internal key of the contract tree; the
        // envelope key must match the control block or the derived address
        // would not be spendable by this reveal.
        let deployer = envelope_pubkey(instructions)?;
        if deployer.serialize() != envelope.control_block.internal_key.serialize() {
            warn!("Deployment envelope key does not match control block internal key");
            return None;
        }

        let salt_pubkey = XOnlyPublicKey::from_slice(&fixed_push::<32>(body.get(2)?)?).ok()?;
        let salt = H256::from_slice(&fixed_push::<32>(body.get(3)?)?);
        let bytecode = collect_pushes(&body[4..]);
        if bytecode.is_empty() {
            return None;
        }

        let derived = ContractScriptBuilder::derive_contract_script(
            &self.secp,
            &deployer,
            &salt_pubkey,
            salt,
            &bytecode,
            self.network,
        )
        .ok()?;

        // Canonical-encoding check: the revealed leaf must be byte-identical
        // to the rebuilt one.
        if derived.leaf_script != envelope.leaf_script {
            warn!("Deployment leaf is not canonically encoded");
            return None;
        }

        // The deployment must actually pay to the derived address.
        if !tx
            .output
            .iter()
            .any(|output| output.script_pubkey == derived.script_pubkey)
        {
            warn!("Deployment output does not pay the derived contract address");
            return None;
        }

        Some(DeploymentTransaction {
            base: base.clone(),
            deployer_pubkey: H256::from_slice(&deployer.serialize()),
            salt_pubkey: H256::from_slice(&salt_pubkey.serialize()),
            salt,
            bytecode,
            contract_address: derived.address.to_string(),
            contract_tweaked_pubkey: derived.tweaked_pubkey,
        })
    }

    #[instrument(skip_all, target = "btc_client::parser")]
    fn parse_interaction(
        &self,
        envelope: &Envelope,
        instructions: &[Instruction<'_>],
        body: &[Instruction<'_>],
        base: &TransactionBase,
    ) -> Option<InteractionTransaction> {
        if body.len() < MIN_INTERACTION_INSTRUCTIONS {
            return None;
        }
        if !push_matches(body.get(1)?, INTERACT_TAG.as_bytes()) {
            return None;
        }

        let caller = envelope_pubkey(instructions)?;
        let contract_tweaked_pubkey = H256::from_slice(&fixed_push::<32>(body.get(2)?)?);
        let gas_sat = u64::from_be_bytes(fixed_push::<8>(body.get(3)?)?);
        let priority_fee = u64::from_be_bytes(fixed_push::<8>(body.get(4)?)?);
        let features =
            InteractionFeatures(u32::from_be_bytes(fixed_push::<4>(body.get(5)?)?));
        let calldata = collect_pushes(&body[6..]);
        if calldata.is_empty() {
            return None;
        }

        let rebuilt = ContractScriptBuilder::interaction_script(
            &caller,
            contract_tweaked_pubkey,
            gas_sat,
            priority_fee,
            features.0,
            &calldata,
        )
        .ok()?;
        if rebuilt != envelope.leaf_script {
            warn!("Interaction leaf is not canonically encoded");
            return None;
        }

        let contract_address = address_for_tweaked_key(contract_tweaked_pubkey, self.network)
            .ok()?
            .to_string();

        Some(InteractionTransaction {
            base: base.clone(),
            from_pubkey: H256::from_slice(&caller.serialize()),
            contract_tweaked_pubkey,
            contract_address,
            calldata,
            theoretical_gas_limit: sat_to_gas(gas_sat, MAX_GAS_PER_TX),
            priority_fee,
            features,
        })
    }
}

/// Decoded tapscript reveal of a classification input.
struct Envelope {
    leaf_script: ScriptBuf,
    control_block: ControlBlock,
}

impl Envelope {
    fn decode(input: &TxIn) -> Option<Self> {
        let witness = &input.witness;
        if witness.len() < MIN_WITNESS_LENGTH {
            return None;
        }

        let control_block = match ControlBlock::decode(witness.last()?) {
            Ok(cb) => cb,
            Err(e) => {
                debug!("Failed to decode control block: {e}");
                return None;
            }
        };
        let leaf_script = ScriptBuf::from_bytes(witness[witness.len() - 2].to_vec());

        Some(Self {
            leaf_script,
            control_block,
        })
    }
}

/// The envelope key: first instruction of the leaf, a 32-byte push in front
/// of `OP_CHECKSIG`.
fn envelope_pubkey(instructions: &[Instruction<'_>]) -> Option<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(&fixed_push::<32>(instructions.first()?)?).ok()
}

fn find_protocol_magic(instructions: &[Instruction<'_>]) -> Option<usize> {
    instructions.iter().position(|instr| {
        matches!(instr, Instruction::PushBytes(bytes) if bytes.as_bytes() == PROTOCOL_MAGIC.as_bytes())
    })
}

fn push_matches(instruction: &Instruction<'_>, expected: &[u8]) -> bool {
    matches!(instruction, Instruction::PushBytes(bytes) if bytes.as_bytes() == expected)
}

fn fixed_push<const N: usize>(instruction: &Instruction<'_>) -> Option<[u8; N]> {
    match instruction {
        Instruction::PushBytes(bytes) => bytes.as_bytes().try_into().ok(),
        _ => None,
    }
}

/// Concatenates consecutive pushes up to (not including) `OP_ENDIF`.
fn collect_pushes(instructions: &[Instruction<'_>]) -> Vec<u8> {
    let mut data = Vec::new();
    for instruction in instructions {
        match instruction {
            Instruction::PushBytes(bytes) => data.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(_) => break,
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        absolute::LockTime, secp256k1::SecretKey, transaction::Version, Amount, OutPoint,
        Sequence, TxOut, Witness,
    };

    use super::*;

    fn keypair(byte: u8) -> (SecretKey, XOnlyPublicKey) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        let (xonly, _) = secret.public_key(&secp).x_only_public_key();
        (secret, xonly)
    }

    /// Assembles a reveal transaction whose first input exposes the given
    /// leaf script under the given internal key.
    fn reveal_tx(
        secp: &Secp256k1<All>,
        internal_key: XOnlyPublicKey,
        leaf_script: ScriptBuf,
        outputs: Vec<TxOut>,
    ) -> Transaction {
        let builder = bitcoin::taproot::TaprootBuilder::new()
            .add_leaf(1, leaf_script.clone())
            .unwrap()
            .add_leaf(1, ContractScriptBuilder::lock_script())
            .unwrap();
        let spend_info = builder.finalize(secp, internal_key).unwrap();
        let control_block = spend_info
            .control_block(&(leaf_script.clone(), bitcoin::taproot::LeafVersion::TapScript))
            .unwrap();

        let mut witness = Witness::new();
        witness.push([0u8; 64]); // placeholder schnorr signature
        witness.push(leaf_script.as_bytes());
        witness.push(control_block.serialize());

        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness,
            }],
            output: outputs,
        }
    }

    #[test]
    fn deployment_round_trips_through_classification() {
        let secp = Secp256k1::new();
        let (_, deployer) = keypair(1);
        let (_, salt_pubkey) = keypair(2);
        let salt = H256::repeat_byte(3);
        let bytecode = vec![0xaa; 700];

        let derived = ContractScriptBuilder::derive_contract_script(
            &secp,
            &deployer,
            &salt_pubkey,
            salt,
            &bytecode,
            Network::Regtest,
        )
        .unwrap();
        let tx = reveal_tx(
            &secp,
            deployer,
            derived.leaf_script.clone(),
            vec![TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: derived.script_pubkey.clone(),
            }],
        );

        let parser = TransactionParser::new(Network::Regtest);
        let parsed = parser.parse_transaction(&tx, BlockNumber(1001));

        match parsed {
            OverlayTransaction::Deployment(deployment) => {
                assert_eq!(deployment.bytecode, bytecode);
                assert_eq!(deployment.salt, salt);
                assert_eq!(deployment.contract_address, derived.address.to_string());
                assert_eq!(deployment.contract_tweaked_pubkey, derived.tweaked_pubkey);
            }
            other => panic!("expected deployment, got {other:?}"),
        }
    }

    #[test]
    fn deployment_paying_elsewhere_falls_back_to_generic() {
        let secp = Secp256k1::new();
        let (_, deployer) = keypair(1);
        let (_, salt_pubkey) = keypair(2);

        let derived = ContractScriptBuilder::derive_contract_script(
            &secp,
            &deployer,
            &salt_pubkey,
            H256::repeat_byte(3),
            b"code",
            Network::Regtest,
        )
        .unwrap();
        // Output pays an unrelated script instead of the derived address.
        let tx = reveal_tx(
            &secp,
            deployer,
            derived.leaf_script,
            vec![TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: ScriptBuf::new(),
            }],
        );

        let parser = TransactionParser::new(Network::Regtest);
        let parsed = parser.parse_transaction(&tx, BlockNumber(1001));
        assert!(matches!(parsed, OverlayTransaction::Generic(_)));
    }

    #[test]
    fn interaction_round_trips_through_classification() {
        let secp = Secp256k1::new();
        let (_, caller) = keypair(4);
        let contract_key = H256::repeat_byte(9);
        let calldata = vec![0x01, 0x02, 0x03];

        let leaf = ContractScriptBuilder::interaction_script(
            &caller,
            contract_key,
            50_000,
            750,
            1,
            &calldata,
        )
        .unwrap();
        let tx = reveal_tx(&secp, caller, leaf, vec![]);

        let parser = TransactionParser::new(Network::Regtest);
        let parsed = parser.parse_transaction(&tx, BlockNumber(42));

        match parsed {
            OverlayTransaction::Interaction(interaction) => {
                assert_eq!(interaction.contract_tweaked_pubkey, contract_key);
                assert_eq!(interaction.calldata, calldata);
                assert_eq!(interaction.priority_fee, 750);
                assert_eq!(
                    interaction.theoretical_gas_limit,
                    sat_to_gas(50_000, MAX_GAS_PER_TX)
                );
                assert!(interaction
                    .features
                    .contains(InteractionFeatures::ACCESS_LIST));
            }
            other => panic!("expected interaction, got {other:?}"),
        }
    }

    #[test]
    fn plain_transfer_is_generic_and_classification_is_stable() {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::new(),
            }],
        };

        let parser = TransactionParser::new(Network::Regtest);
        let first = parser.parse_transaction(&tx, BlockNumber(1));
        let second = parser.parse_transaction(&tx, BlockNumber(1));
        assert!(matches!(first, OverlayTransaction::Generic(_)));
        assert_eq!(first, second);
    }
}
