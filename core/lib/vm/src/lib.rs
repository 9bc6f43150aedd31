//! Contract execution host.
//!
//! The bytecode interpreter itself is an opaque capability implemented
//! behind [`ContractRuntime`]; this crate owns everything around it: gas
//! accounting, the storage write journal, re-entrant call frames, transient
//! storage, event capture, and receipt assembly. Execution is synchronous
//! from the host's perspective; callers enforce the wall-clock watchdog at
//! the task level, and every host capability additionally checks the
//! deadline so a runaway runtime is stopped at its next host call.

use thiserror::Error;

mod gas;
mod host;
mod journal;
mod runtime;

pub use gas::{costs, GasMeter};
pub use host::{AccountType, CallContext, SpecialContractLimits, SpecialContracts, VmExecutor};
pub use runtime::{
    ContractRuntime, DeployedContract, ExecutionCall, ExecutionReceipt, NoopRuntime, StateAccess,
};

/// Failures local to a single transaction; captured into the receipt, never
/// failing the block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,

    #[error("execution deadline exceeded")]
    Timeout,

    #[error("reverted: {reason}")]
    Revert { reason: String },

    #[error("trap: {0}")]
    Trap(String),
}

pub type VmResult<T> = Result<T, VmError>;
