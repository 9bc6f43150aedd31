use std::collections::BTreeMap;

use opnet_basic_types::{BlockNumber, H256};
use opnet_types::{AccessList, ContractEvent};

use crate::{host::CallContext, VmResult};

/// The opaque bytecode interpreter. The host hands it a call frame and the
/// capability set; the instruction set itself is outside this repository.
pub trait ContractRuntime: Send + Sync {
    fn execute(&self, bytecode: &[u8], ctx: &mut CallContext<'_, '_>) -> VmResult<Vec<u8>>;
}

/// Placeholder runtime mounted while no instruction-set capability is
/// configured: every call succeeds with an empty result after charging a
/// flat cost per calldata byte. Deployments and receipts still flow through
/// the full host path.
#[derive(Debug, Default)]
pub struct NoopRuntime;

impl ContractRuntime for NoopRuntime {
    fn execute(&self, bytecode: &[u8], ctx: &mut CallContext<'_, '_>) -> VmResult<Vec<u8>> {
        ctx.charge((bytecode.len() as u64 + ctx.calldata.len() as u64).saturating_mul(4))?;
        Ok(Vec::new())
    }
}

/// Read access to committed state during execution. The block pipeline
/// layers same-block pending writes over the store before handing the view
/// to the executor.
pub trait StateAccess: Send + Sync {
    fn storage_value(&self, contract: H256, pointer: H256) -> VmResult<Option<H256>>;
    fn contract_bytecode(&self, contract: H256) -> VmResult<Option<Vec<u8>>>;
    fn block_hash(&self, height: BlockNumber) -> VmResult<Option<H256>>;
}

/// One top-level execution request.
#[derive(Debug, Clone)]
pub struct ExecutionCall {
    /// Tweaked key of the target contract.
    pub contract: H256,
    pub calldata: Vec<u8>,
    /// X-only key of the calling wallet.
    pub caller: H256,
    pub value: u64,
    pub height: BlockNumber,
    pub max_gas: u64,
    pub is_deployment: bool,
    /// Constructor bytecode for deployments not yet visible in state.
    pub bytecode: Option<Vec<u8>>,
    /// Canonical encoding of the underlying base-chain tx inputs/outputs,
    /// exposed to the runtime verbatim.
    pub tx_inputs: Vec<u8>,
    pub tx_outputs: Vec<u8>,
}

/// A contract deployed by a running contract via the `deploy` capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: String,
    pub tweaked_pubkey: H256,
    pub deployer: H256,
    pub salt: H256,
    pub bytecode: Vec<u8>,
}

/// Outcome of one top-level execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub result: Option<Vec<u8>>,
    pub revert: Option<String>,
    pub events: Vec<ContractEvent>,
    /// Rounded up to the `SAT_TO_GAS_RATIO` boundary; never exceeds the
    /// call's `max_gas`.
    pub gas_used: u64,
    pub access_list: AccessList,
    pub deployed_contracts: Vec<DeployedContract>,
    /// Last-write-wins storage changes, empty on revert.
    pub changed_storage: BTreeMap<H256, BTreeMap<H256, H256>>,
}

impl ExecutionReceipt {
    pub fn reverted(reason: String, gas_used: u64) -> Self {
        Self {
            result: None,
            revert: Some(reason),
            events: Vec::new(),
            gas_used,
            access_list: AccessList::new(),
            deployed_contracts: Vec::new(),
            changed_storage: BTreeMap::new(),
        }
    }
}
