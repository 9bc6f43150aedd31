use std::{collections::HashMap, sync::Arc, time::Instant};

use bitcoin::{
    secp256k1::{All, Secp256k1},
    Network, XOnlyPublicKey,
};
use tracing::{instrument, warn};

use opnet_basic_types::H256;
use opnet_config::VmConfig;
use opnet_types::{round_up_to_ratio, AccessList, ContractEvent};

use opnet_btc_client::script::ContractScriptBuilder;

use crate::{
    gas::{costs, GasMeter},
    journal::{StorageJournal, TransientStorage},
    runtime::{ContractRuntime, DeployedContract, ExecutionCall, ExecutionReceipt, StateAccess},
    VmError, VmResult,
};

/// Classification of an address as seen by contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Contract,
    External,
}

/// Limit overrides for one designated system contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialContractLimits {
    pub free_gas: bool,
    pub bypass_block_limit: bool,
    pub max_external_gas: Option<u64>,
}

/// Process-wide map of system contracts to their limit overrides.
#[derive(Debug, Clone, Default)]
pub struct SpecialContracts {
    limits: HashMap<H256, SpecialContractLimits>,
}

impl SpecialContracts {
    pub fn from_config(config: &VmConfig) -> anyhow::Result<Self> {
        let mut limits = HashMap::new();
        for entry in &config.special_contracts {
            let raw = hex::decode(entry.contract.trim_start_matches("0x"))?;
            if raw.len() != 32 {
                anyhow::bail!("special contract key must be 32 bytes: {}", entry.contract);
            }
            limits.insert(
                H256::from_slice(&raw),
                SpecialContractLimits {
                    free_gas: entry.free_gas,
                    bypass_block_limit: entry.bypass_block_limit,
                    max_external_gas: entry.max_external_gas,
                },
            );
        }
        Ok(Self { limits })
    }

    pub fn get(&self, contract: &H256) -> Option<&SpecialContractLimits> {
        self.limits.get(contract)
    }
}

/// Executes top-level calls against a state view, producing receipts.
pub struct VmExecutor {
    network: Network,
    config: VmConfig,
    special: SpecialContracts,
    runtime: Arc<dyn ContractRuntime>,
}

impl std::fmt::Debug for VmExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmExecutor")
            .field("network", &self.network)
            .finish()
    }
}

impl VmExecutor {
    pub fn new(
        network: Network,
        config: VmConfig,
        runtime: Arc<dyn ContractRuntime>,
    ) -> anyhow::Result<Self> {
        let special = SpecialContracts::from_config(&config)?;
        Ok(Self {
            network,
            config,
            special,
            runtime,
        })
    }

    /// Runs one call to completion. Never fails: every error is folded into
    /// the receipt.
    #[instrument(skip(self, state, call), fields(contract = ?call.contract), target = "vm::executor")]
    pub fn execute(&self, state: &dyn StateAccess, call: ExecutionCall) -> ExecutionReceipt {
        let deadline = Instant::now() + self.config.call_timeout();
        let free = self
            .special
            .get(&call.contract)
            .map_or(false, |limits| limits.free_gas);
        let mut meter = if free {
            GasMeter::free(deadline)
        } else {
            GasMeter::new(call.max_gas, deadline)
        };

        let mut host = HostState {
            state,
            runtime: Arc::clone(&self.runtime),
            secp: Secp256k1::new(),
            network: self.network,
            special: &self.special,
            max_depth: self.config.max_call_depth,
            height: call.height,
            tx_inputs: call.tx_inputs,
            tx_outputs: call.tx_outputs,
            journal: StorageJournal::default(),
            transient: TransientStorage::default(),
            events: Vec::new(),
            event_marks: Vec::new(),
            deployed: Vec::new(),
            deploy_marks: Vec::new(),
            access_list: AccessList::new(),
            pending_bytecode: HashMap::new(),
        };
        if let Some(bytecode) = call.bytecode {
            host.pending_bytecode.insert(call.contract, bytecode);
        }

        let outcome = host.execute_frame(
            call.contract,
            call.caller,
            call.calldata,
            call.value,
            &mut meter,
            0,
        );

        match outcome {
            Ok(result) => ExecutionReceipt {
                result: Some(result),
                revert: None,
                events: host.events,
                gas_used: report_gas(&meter, call.max_gas),
                access_list: host.access_list,
                deployed_contracts: host.deployed,
                changed_storage: host.journal.into_changes(),
            },
            Err(error) => {
                warn!(%error, "execution reverted");
                let gas_used = match error {
                    VmError::OutOfGas => call.max_gas,
                    _ => report_gas(&meter, call.max_gas),
                };
                let reason = match error {
                    VmError::Revert { reason } => reason,
                    other => other.to_string(),
                };
                let mut receipt = ExecutionReceipt::reverted(reason, gas_used);
                receipt.access_list = host.access_list;
                receipt
            }
        }
    }
}

fn report_gas(meter: &GasMeter, max_gas: u64) -> u64 {
    if meter.is_free() {
        0
    } else {
        round_up_to_ratio(meter.used()).min(max_gas)
    }
}

pub(crate) struct HostState<'env> {
    state: &'env dyn StateAccess,
    runtime: Arc<dyn ContractRuntime>,
    secp: Secp256k1<All>,
    network: Network,
    special: &'env SpecialContracts,
    max_depth: u32,
    height: opnet_basic_types::BlockNumber,
    tx_inputs: Vec<u8>,
    tx_outputs: Vec<u8>,
    journal: StorageJournal,
    transient: TransientStorage,
    events: Vec<ContractEvent>,
    event_marks: Vec<usize>,
    deployed: Vec<DeployedContract>,
    deploy_marks: Vec<usize>,
    access_list: AccessList,
    /// Bytecode of contracts deployed within this transaction, visible to
    /// nested calls before the block commits.
    pending_bytecode: HashMap<H256, Vec<u8>>,
}

impl<'env> HostState<'env> {
    fn execute_frame(
        &mut self,
        contract: H256,
        caller: H256,
        calldata: Vec<u8>,
        value: u64,
        meter: &mut GasMeter,
        depth: u32,
    ) -> VmResult<Vec<u8>> {
        if depth >= self.max_depth {
            return Err(VmError::Trap("call depth exceeded".to_string()));
        }
        meter.check_deadline()?;

        let bytecode = self
            .bytecode_of(contract)?
            .ok_or_else(|| VmError::Trap(format!("no contract at {contract:?}")))?;

        self.begin_frame();
        let runtime = Arc::clone(&self.runtime);
        let outcome = {
            let mut ctx = CallContext {
                host: self,
                meter,
                contract,
                caller,
                calldata,
                value,
                depth,
            };
            runtime.execute(&bytecode, &mut ctx)
        };
        self.end_frame(outcome.is_ok());
        outcome
    }

    fn begin_frame(&mut self) {
        self.journal.begin_frame();
        self.transient.begin_frame();
        self.event_marks.push(self.events.len());
        self.deploy_marks.push(self.deployed.len());
    }

    fn end_frame(&mut self, committed: bool) {
        let event_mark = self.event_marks.pop().unwrap_or(0);
        let deploy_mark = self.deploy_marks.pop().unwrap_or(0);

        if committed {
            self.journal.commit_frame();
        } else {
            self.journal.revert_frame();
            self.events.truncate(event_mark);
            for undone in self.deployed.drain(deploy_mark..).collect::<Vec<_>>() {
                self.pending_bytecode.remove(&undone.tweaked_pubkey);
            }
        }
        self.transient.end_frame();
    }

    fn bytecode_of(&self, contract: H256) -> VmResult<Option<Vec<u8>>> {
        if let Some(bytecode) = self.pending_bytecode.get(&contract) {
            return Ok(Some(bytecode.clone()));
        }
        self.state.contract_bytecode(contract)
    }

    fn record_access(&mut self, contract: H256, pointer: H256) {
        self.access_list.entry(contract).or_default().insert(pointer);
    }
}

/// One call frame's view of the host capabilities. Everything a contract
/// can do crosses this surface, so every method charges gas and checks the
/// wall-clock deadline.
pub struct CallContext<'a, 'env> {
    host: &'a mut HostState<'env>,
    meter: &'a mut GasMeter,
    pub contract: H256,
    pub caller: H256,
    pub calldata: Vec<u8>,
    pub value: u64,
    pub depth: u32,
}

impl CallContext<'_, '_> {
    /// Opcode-level gas charged by the runtime.
    pub fn charge(&mut self, gas: u64) -> VmResult<()> {
        self.meter.charge(gas)
    }

    pub fn remaining_gas(&self) -> u64 {
        self.meter.remaining()
    }

    pub fn load(&mut self, pointer: H256) -> VmResult<Option<H256>> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::LOAD)?;
        self.host.record_access(self.contract, pointer);
        if let Some(value) = self.host.journal.read(self.contract, pointer) {
            return Ok(Some(value));
        }
        self.host.state.storage_value(self.contract, pointer)
    }

    pub fn store(&mut self, pointer: H256, value: H256) -> VmResult<()> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::STORE)?;
        self.host.record_access(self.contract, pointer);
        self.host.journal.write(self.contract, pointer, value);
        Ok(())
    }

    pub fn t_load(&mut self, pointer: H256) -> VmResult<Option<H256>> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::TRANSIENT_LOAD)?;
        Ok(self.host.transient.read(self.contract, pointer))
    }

    pub fn t_store(&mut self, pointer: H256, value: H256) -> VmResult<()> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::TRANSIENT_STORE)?;
        self.host.transient.write(self.contract, pointer, value);
        Ok(())
    }

    /// Nested invocation with its own gas accounting. Failures propagate as
    /// reverts unless the calling runtime catches the error.
    pub fn call(&mut self, contract: H256, calldata: Vec<u8>, gas_limit: u64) -> VmResult<Vec<u8>> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::CALL_BASE)?;

        let mut child_limit = gas_limit.min(self.meter.remaining());
        if let Some(cap) = self
            .host
            .special
            .get(&self.contract)
            .and_then(|limits| limits.max_external_gas)
        {
            child_limit = child_limit.min(cap);
        }

        let callee_free = self
            .host
            .special
            .get(&contract)
            .map_or(false, |limits| limits.free_gas);
        let mut child_meter = if callee_free {
            GasMeter::free(self.meter.deadline())
        } else {
            GasMeter::new(child_limit, self.meter.deadline())
        };

        let result = self.host.execute_frame(
            contract,
            self.contract,
            calldata,
            0,
            &mut child_meter,
            self.depth + 1,
        );
        self.meter.charge(child_meter.used())?;
        result
    }

    /// Deploys a child contract. The running contract's key becomes the
    /// deployer key of the derived address.
    pub fn deploy(&mut self, bytecode: Vec<u8>, salt: H256) -> VmResult<H256> {
        self.meter.check_deadline()?;
        self.meter.charge(
            costs::DEPLOY_BASE
                .saturating_add(costs::DEPLOY_PER_BYTE.saturating_mul(bytecode.len() as u64)),
        )?;

        let deployer = XOnlyPublicKey::from_slice(self.contract.as_bytes())
            .map_err(|e| VmError::Trap(format!("invalid deployer key: {e}")))?;
        let derived = ContractScriptBuilder::derive_contract_script(
            &self.host.secp,
            &deployer,
            &deployer,
            salt,
            &bytecode,
            self.host.network,
        )
        .map_err(|e| VmError::Trap(format!("address derivation failed: {e}")))?;

        if self.host.bytecode_of(derived.tweaked_pubkey)?.is_some() {
            return Err(VmError::Revert {
                reason: "contract already deployed".to_string(),
            });
        }

        self.host
            .pending_bytecode
            .insert(derived.tweaked_pubkey, bytecode.clone());
        self.host.deployed.push(DeployedContract {
            address: derived.address.to_string(),
            tweaked_pubkey: derived.tweaked_pubkey,
            deployer: self.contract,
            salt,
            bytecode,
        });

        Ok(derived.tweaked_pubkey)
    }

    pub fn emit(&mut self, data: Vec<u8>) -> VmResult<()> {
        self.meter.check_deadline()?;
        self.meter.charge(
            costs::EMIT_BASE
                .saturating_add(costs::EMIT_PER_BYTE.saturating_mul(data.len() as u64)),
        )?;
        self.host.events.push(ContractEvent {
            contract: self.contract,
            data,
        });
        Ok(())
    }

    /// Canonical encoding of the underlying base-chain tx inputs.
    pub fn inputs(&self) -> &[u8] {
        &self.host.tx_inputs
    }

    /// Canonical encoding of the underlying base-chain tx outputs.
    pub fn outputs(&self) -> &[u8] {
        &self.host.tx_outputs
    }

    pub fn account_type(&mut self, key: H256) -> VmResult<AccountType> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::ACCOUNT_TYPE)?;
        Ok(if self.host.bytecode_of(key)?.is_some() {
            AccountType::Contract
        } else {
            AccountType::External
        })
    }

    pub fn block_hash(&mut self, height: u64) -> VmResult<Option<H256>> {
        self.meter.check_deadline()?;
        self.meter.charge(costs::BLOCK_HASH)?;
        self.host
            .state
            .block_hash(opnet_basic_types::BlockNumber(height))
    }

    pub fn current_height(&self) -> u64 {
        self.host.height.0
    }
}
