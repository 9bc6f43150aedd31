use std::collections::{HashMap, HashSet};

use anyhow::Context as _;

use opnet_basic_types::H256;
use opnet_config::ConsensusConfig;
use opnet_types::BlockWitness;

/// Static trusted-validator set for one network: entities and the validator
/// keys they operate, plus the finality minimums.
#[derive(Debug, Clone)]
pub struct TrustedValidatorSet {
    entities: Vec<TrustedEntity>,
    /// Minimum distinct trusted validators to finalise a block.
    pub minimum: usize,
    /// Minimum witnesses per transaction generation.
    pub transaction_minimum: usize,
    /// Minimum distinct entities among the finalising validators.
    pub minimum_validator_transaction_generation: usize,
    /// Validators counted per entity are capped at this.
    pub maximum_validator_per_trusted_entities: usize,
}

#[derive(Debug, Clone)]
struct TrustedEntity {
    name: String,
    validators: HashSet<H256>,
}

impl TrustedValidatorSet {
    pub fn from_config(config: &ConsensusConfig) -> anyhow::Result<Self> {
        let entities = config
            .entities
            .iter()
            .map(|entity| {
                let validators = entity
                    .validators
                    .iter()
                    .map(|key| parse_pubkey(key))
                    .collect::<anyhow::Result<HashSet<_>>>()
                    .with_context(|| format!("invalid validator key in entity {}", entity.name))?;
                Ok(TrustedEntity {
                    name: entity.name.clone(),
                    validators,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            entities,
            minimum: config.minimum,
            transaction_minimum: config.transaction_minimum,
            minimum_validator_transaction_generation: config
                .minimum_validator_transaction_generation,
            maximum_validator_per_trusted_entities: config.maximum_validator_per_trusted_entities,
        })
    }

    pub fn is_trusted(&self, pubkey: H256) -> bool {
        self.entity_of(pubkey).is_some()
    }

    pub fn entity_of(&self, pubkey: H256) -> Option<&str> {
        self.entities
            .iter()
            .find(|entity| entity.validators.contains(&pubkey))
            .map(|entity| entity.name.as_str())
    }

    /// A block finalises once it holds signatures from at least `minimum`
    /// distinct trusted validators spread across at least
    /// `minimum_validator_transaction_generation` entities, with at most
    /// `maximum_validator_per_trusted_entities` counted per entity.
    pub fn is_finalized(&self, witnesses: &[BlockWitness]) -> bool {
        let mut per_entity: HashMap<&str, HashSet<H256>> = HashMap::new();
        for witness in witnesses {
            if let Some(entity) = self.entity_of(witness.pubkey) {
                per_entity.entry(entity).or_default().insert(witness.pubkey);
            }
        }

        let counted: usize = per_entity
            .values()
            .map(|validators| {
                validators
                    .len()
                    .min(self.maximum_validator_per_trusted_entities)
            })
            .sum();

        counted >= self.minimum
            && per_entity.len() >= self.minimum_validator_transaction_generation
    }
}

fn parse_pubkey(hex_key: &str) -> anyhow::Result<H256> {
    let raw = hex::decode(hex_key.trim_start_matches("0x"))?;
    anyhow::ensure!(raw.len() == 32, "validator key must be 32 bytes");
    Ok(H256::from_slice(&raw))
}
