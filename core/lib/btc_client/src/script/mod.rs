//! Tapscript construction for overlay contracts.
//!
//! A deployment commits the contract bytecode inside a tapscript envelope;
//! the contract address is the P2TR address of a two-leaf taproot tree built
//! from that envelope plus a fixed `OP_0` lock leaf, with the deployer's
//! x-only key as the internal key. The tree shape is normative: changing it
//! changes every derived contract address.

use bitcoin::{
    key::UntweakedPublicKey,
    opcodes::{all, OP_0, OP_FALSE},
    script::{Builder as ScriptBuilder, PushBytesBuf},
    secp256k1::{Secp256k1, Signing, Verification},
    taproot::{TaprootBuilder, TaprootSpendInfo},
    Address, Network, ScriptBuf, XOnlyPublicKey,
};
use lazy_static::lazy_static;

use opnet_basic_types::H256;

use crate::types::{BitcoinError, Result};

lazy_static! {
    pub static ref PROTOCOL_MAGIC: PushBytesBuf = PushBytesBuf::from(b"opnet");
    pub static ref DEPLOY_TAG: PushBytesBuf = PushBytesBuf::from(b"deploy");
    pub static ref INTERACT_TAG: PushBytesBuf = PushBytesBuf::from(b"interact");
}

/// Consensus limit on a single tapscript push.
pub const MAX_PUSH_SIZE: usize = 520;

/// A derived contract script set: the envelope leaf, the lock leaf, and the
/// P2TR commitment they produce.
pub struct ContractScript {
    pub leaf_script: ScriptBuf,
    pub lock_script: ScriptBuf,
    pub script_pubkey: ScriptBuf,
    pub address: Address,
    /// X-only output key of the tree (the contract's tweaked key).
    pub tweaked_pubkey: H256,
    pub taproot_spend_info: TaprootSpendInfo,
}

pub struct ContractScriptBuilder;

impl ContractScriptBuilder {
    /// Envelope leaf revealed by a deployment input.
    pub fn deployment_script(
        deployer: &XOnlyPublicKey,
        salt_pubkey: &XOnlyPublicKey,
        salt: H256,
        bytecode: &[u8],
    ) -> Result<ScriptBuf> {
        let mut script = Self::envelope_prefix(deployer)
            .push_slice(DEPLOY_TAG.as_push_bytes())
            .push_slice(PushBytesBuf::from(salt_pubkey.serialize()).as_push_bytes())
            .push_slice(PushBytesBuf::from(salt.to_fixed_bytes()).as_push_bytes());
        for chunk in bytecode.chunks(MAX_PUSH_SIZE) {
            script = script.push_slice(encode_push(chunk)?.as_push_bytes());
        }
        Ok(script.push_opcode(all::OP_ENDIF).into_script())
    }

    /// Envelope leaf revealed by an interaction input.
    pub fn interaction_script(
        caller: &XOnlyPublicKey,
        contract_tweaked_pubkey: H256,
        gas_sat: u64,
        priority_fee_sat: u64,
        features: u32,
        calldata: &[u8],
    ) -> Result<ScriptBuf> {
        let mut script = Self::envelope_prefix(caller)
            .push_slice(INTERACT_TAG.as_push_bytes())
            .push_slice(PushBytesBuf::from(contract_tweaked_pubkey.to_fixed_bytes()).as_push_bytes())
            .push_slice(PushBytesBuf::from(gas_sat.to_be_bytes()).as_push_bytes())
            .push_slice(PushBytesBuf::from(priority_fee_sat.to_be_bytes()).as_push_bytes())
            .push_slice(PushBytesBuf::from(features.to_be_bytes()).as_push_bytes());
        for chunk in calldata.chunks(MAX_PUSH_SIZE) {
            script = script.push_slice(encode_push(chunk)?.as_push_bytes());
        }
        Ok(script.push_opcode(all::OP_ENDIF).into_script())
    }

    /// The fixed second leaf of every contract tree.
    pub fn lock_script() -> ScriptBuf {
        ScriptBuilder::new().push_opcode(OP_0).into_script()
    }

    /// Builds the contract taproot tree for a deployment and derives the
    /// contract address.
    pub fn derive_contract_script<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        deployer: &XOnlyPublicKey,
        salt_pubkey: &XOnlyPublicKey,
        salt: H256,
        bytecode: &[u8],
        network: Network,
    ) -> Result<ContractScript> {
        let leaf_script = Self::deployment_script(deployer, salt_pubkey, salt, bytecode)?;
        Self::commit(secp, *deployer, leaf_script, network)
    }

    fn commit<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        internal_key: UntweakedPublicKey,
        leaf_script: ScriptBuf,
        network: Network,
    ) -> Result<ContractScript> {
        let lock_script = Self::lock_script();

        // Both leaves sit at depth 1; leaf version is the default tapscript
        // version (0xc0).
        let builder = TaprootBuilder::new()
            .add_leaf(1, leaf_script.clone())
            .and_then(|builder| builder.add_leaf(1, lock_script.clone()))
            .map_err(|e| BitcoinError::TaprootError(format!("failed to add leaf: {e:?}")))?;

        let taproot_spend_info = builder
            .finalize(secp, internal_key)
            .map_err(|e| BitcoinError::TaprootError(format!("failed to finalize tree: {e:?}")))?;

        let output_key = taproot_spend_info.output_key();
        let address = Address::p2tr_tweaked(output_key, network);
        let script_pubkey = address.script_pubkey();

        Ok(ContractScript {
            leaf_script,
            lock_script,
            script_pubkey,
            address,
            tweaked_pubkey: H256::from_slice(&output_key.serialize()),
            taproot_spend_info,
        })
    }

    fn envelope_prefix(pubkey: &XOnlyPublicKey) -> ScriptBuilder {
        ScriptBuilder::new()
            .push_slice(PushBytesBuf::from(pubkey.serialize()).as_push_bytes())
            .push_opcode(all::OP_CHECKSIG)
            .push_opcode(OP_FALSE)
            .push_opcode(all::OP_IF)
            .push_slice(PROTOCOL_MAGIC.as_push_bytes())
    }
}

/// P2TR address string for a known tweaked key (interactions reference
/// contracts by that key on the wire).
pub fn address_for_tweaked_key(tweaked_pubkey: H256, network: Network) -> Result<Address> {
    let xonly = XOnlyPublicKey::from_slice(tweaked_pubkey.as_bytes())
        .map_err(|e| BitcoinError::InvalidAddress(e.to_string()))?;
    let tweaked = bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(xonly);
    Ok(Address::p2tr_tweaked(tweaked, network))
}

/// Key-path-only P2TR address of a wallet key; the sender form shown for
/// classified transactions.
pub fn key_path_address(key: H256, network: Network) -> Result<Address> {
    let secp = Secp256k1::verification_only();
    let xonly = XOnlyPublicKey::from_slice(key.as_bytes())
        .map_err(|e| BitcoinError::InvalidAddress(e.to_string()))?;
    Ok(Address::p2tr(&secp, xonly, None, network))
}

fn encode_push(bytes: &[u8]) -> Result<PushBytesBuf> {
    let mut buf = PushBytesBuf::with_capacity(bytes.len());
    buf.extend_from_slice(bytes)
        .map_err(|e| BitcoinError::InvalidTransaction(format!("push too large: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SecretKey;

    use super::*;

    fn xonly(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        secret.public_key(&secp).x_only_public_key().0
    }

    #[test]
    fn deployment_address_is_deterministic() {
        let secp = Secp256k1::new();
        let deployer = xonly(1);
        let salt_pubkey = xonly(2);
        let salt = H256::repeat_byte(3);

        let a = ContractScriptBuilder::derive_contract_script(
            &secp, &deployer, &salt_pubkey, salt, b"code", Network::Regtest,
        )
        .unwrap();
        let b = ContractScriptBuilder::derive_contract_script(
            &secp, &deployer, &salt_pubkey, salt, b"code", Network::Regtest,
        )
        .unwrap();

        assert_eq!(a.address, b.address);
        assert_eq!(a.tweaked_pubkey, b.tweaked_pubkey);
    }

    #[test]
    fn address_changes_with_salt_and_bytecode() {
        let secp = Secp256k1::new();
        let deployer = xonly(1);
        let salt_pubkey = xonly(2);

        let base = ContractScriptBuilder::derive_contract_script(
            &secp,
            &deployer,
            &salt_pubkey,
            H256::repeat_byte(3),
            b"code",
            Network::Regtest,
        )
        .unwrap();
        let other_salt = ContractScriptBuilder::derive_contract_script(
            &secp,
            &deployer,
            &salt_pubkey,
            H256::repeat_byte(4),
            b"code",
            Network::Regtest,
        )
        .unwrap();
        let other_code = ContractScriptBuilder::derive_contract_script(
            &secp,
            &deployer,
            &salt_pubkey,
            H256::repeat_byte(3),
            b"code2",
            Network::Regtest,
        )
        .unwrap();

        assert_ne!(base.address, other_salt.address);
        assert_ne!(base.address, other_code.address);
    }

    #[test]
    fn tweaked_key_round_trips_to_the_same_address() {
        let secp = Secp256k1::new();
        let derived = ContractScriptBuilder::derive_contract_script(
            &secp,
            &xonly(1),
            &xonly(2),
            H256::repeat_byte(3),
            b"code",
            Network::Regtest,
        )
        .unwrap();

        let rebuilt = address_for_tweaked_key(derived.tweaked_pubkey, Network::Regtest).unwrap();
        assert_eq!(rebuilt, derived.address);
    }

    #[test]
    fn large_bytecode_is_chunked() {
        let bytecode = vec![0xaa; 3 * MAX_PUSH_SIZE + 17];
        let script = ContractScriptBuilder::deployment_script(
            &xonly(1),
            &xonly(2),
            H256::repeat_byte(3),
            &bytecode,
        )
        .unwrap();
        // Envelope + four bytecode pushes must decode back to instructions.
        assert!(script.instructions().all(|i| i.is_ok()));
    }
}
