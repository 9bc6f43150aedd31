//! Primitive types shared across the OPNet node crates.
//!
//! `H256`/`U256` are re-exported from `ethereum_types` so that hashing,
//! arithmetic, and serde behave identically everywhere. The newtypes below
//! exist to keep block heights and epoch numbers from being mixed up with
//! plain integers in function signatures.

use std::{fmt, num::ParseIntError, ops, str::FromStr};

use serde::{Deserialize, Serialize};

pub use ethabi::ethereum_types::{H160, H256, U256};

pub mod conversions;

/// Height of a base-chain (Bitcoin) block.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for BlockNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for BlockNumber {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl ops::Add<u64> for BlockNumber {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl ops::Sub<u64> for BlockNumber {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self {
        Self(self.0 - rhs)
    }
}

/// Index of a mining epoch; always `height / blocks_per_epoch`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EpochNumber(pub u64);

impl EpochNumber {
    pub fn containing(height: BlockNumber, blocks_per_epoch: u64) -> Self {
        Self(height.0 / blocks_per_epoch)
    }

    pub fn start_block(self, blocks_per_epoch: u64) -> BlockNumber {
        BlockNumber(self.0 * blocks_per_epoch)
    }

    pub fn end_block(self, blocks_per_epoch: u64) -> BlockNumber {
        BlockNumber(self.0 * blocks_per_epoch + blocks_per_epoch - 1)
    }
}

impl fmt::Display for EpochNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for EpochNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
