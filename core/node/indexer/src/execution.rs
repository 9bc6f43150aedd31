//! Execution of a block's ordered overlay transactions through the VM host.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::{debug, instrument};

use opnet_basic_types::{BlockNumber, H256};
use opnet_storage::Store;
use opnet_types::{
    Contract, OverlayTransaction, TransactionReceipt, MAX_GAS_PER_TX,
};
use opnet_vm::{ExecutionCall, StateAccess, VmError, VmExecutor, VmResult};

/// State view handed to the VM: same-block pending effects layered over the
/// committed store. The executor is synchronous, so committed reads block
/// on the store future in place.
struct BlockStateView {
    store: Arc<dyn Store>,
    /// Reads resolve against the parent height.
    parent_height: BlockNumber,
    pending_storage: HashMap<(H256, H256), H256>,
    pending_bytecode: HashMap<H256, Vec<u8>>,
}

impl StateAccess for BlockStateView {
    fn storage_value(&self, contract: H256, pointer: H256) -> VmResult<Option<H256>> {
        if let Some(value) = self.pending_storage.get(&(contract, pointer)) {
            return Ok(Some(*value));
        }
        let row = futures::executor::block_on(self.store.pointer_value_at(
            contract,
            pointer,
            self.parent_height,
        ))
        .map_err(|e| VmError::Trap(format!("state read failed: {e}")))?;
        Ok(row.map(|row| row.value))
    }

    fn contract_bytecode(&self, contract: H256) -> VmResult<Option<Vec<u8>>> {
        if let Some(bytecode) = self.pending_bytecode.get(&contract) {
            return Ok(Some(bytecode.clone()));
        }
        let row = futures::executor::block_on(self.store.contract_by_tweaked_key(contract))
            .map_err(|e| VmError::Trap(format!("state read failed: {e}")))?;
        Ok(row.map(|contract| contract.bytecode))
    }

    fn block_hash(&self, height: BlockNumber) -> VmResult<Option<H256>> {
        if height > self.parent_height {
            return Ok(None);
        }
        let header = futures::executor::block_on(self.store.block_by_height(height))
            .map_err(|e| VmError::Trap(format!("state read failed: {e}")))?;
        Ok(header.map(|header| header.hash))
    }
}

/// Read-only call against committed state at a height; used by the API's
/// simulation endpoints. Nothing is persisted.
pub fn simulate_call(
    store: Arc<dyn Store>,
    vm: &VmExecutor,
    height: BlockNumber,
    contract: H256,
    calldata: Vec<u8>,
    caller: H256,
    max_gas: u64,
) -> opnet_vm::ExecutionReceipt {
    let view = BlockStateView {
        store,
        parent_height: height,
        pending_storage: HashMap::new(),
        pending_bytecode: HashMap::new(),
    };
    vm.execute(
        &view,
        ExecutionCall {
            contract,
            calldata,
            caller,
            value: 0,
            height,
            max_gas,
            is_deployment: false,
            bytecode: None,
            tx_inputs: Vec::new(),
            tx_outputs: Vec::new(),
        },
    )
}

/// Outcome of executing one block's worth of transactions.
#[derive(Debug, Default)]
pub struct BlockExecutionOutput {
    pub receipts: Vec<TransactionReceipt>,
    pub new_contracts: Vec<Contract>,
    /// Block-wide last-write-wins pointer map.
    pub pointer_writes: BTreeMap<(H256, H256), H256>,
    pub total_gas_used: u128,
    pub total_priority_fee: u128,
}

/// Runs the ordered executable transactions of one block.
#[instrument(skip_all, fields(height = height.0), target = "indexer::execution")]
pub fn execute_block(
    store: Arc<dyn Store>,
    vm: &VmExecutor,
    height: BlockNumber,
    ordered: &[OverlayTransaction],
) -> BlockExecutionOutput {
    let mut view = BlockStateView {
        store,
        parent_height: BlockNumber(height.0.saturating_sub(1)),
        pending_storage: HashMap::new(),
        pending_bytecode: HashMap::new(),
    };
    let mut output = BlockExecutionOutput::default();
    let mut receipt_index = 0u32;

    for tx in ordered {
        let call = match build_call(tx, height, &mut view, &mut output) {
            Some(call) => call,
            None => continue,
        };

        output.total_priority_fee += u128::from(tx.priority_fee());
        let receipt = vm.execute(&view, call);
        debug!(txid = ?tx.txid(), revert = ?receipt.revert, gas = receipt.gas_used, "executed transaction");
        output.total_gas_used += u128::from(receipt.gas_used);

        if receipt.revert.is_none() {
            for (contract, pointers) in &receipt.changed_storage {
                for (pointer, value) in pointers {
                    view.pending_storage.insert((*contract, *pointer), *value);
                    output
                        .pointer_writes
                        .insert((*contract, *pointer), *value);
                }
            }
            for deployed in &receipt.deployed_contracts {
                view.pending_bytecode
                    .insert(deployed.tweaked_pubkey, deployed.bytecode.clone());
                output.new_contracts.push(Contract {
                    contract_address: deployed.address.clone(),
                    tweaked_pubkey: deployed.tweaked_pubkey,
                    deployer: deployed.deployer,
                    bytecode_hash: Contract::bytecode_hash_of(&deployed.bytecode),
                    bytecode: deployed.bytecode.clone(),
                    deployment_txid: tx.txid(),
                    deployment_height: height,
                });
            }
        } else if let OverlayTransaction::Deployment(deployment) = tx {
            // A reverted constructor leaves no contract behind.
            view.pending_bytecode
                .remove(&deployment.contract_tweaked_pubkey);
            output.new_contracts.retain(|contract| {
                contract.tweaked_pubkey != deployment.contract_tweaked_pubkey
            });
        }

        output.receipts.push(TransactionReceipt {
            txid: tx.txid(),
            receipt_index,
            result: receipt.result,
            revert: receipt.revert,
            events: receipt.events,
            gas_used: receipt.gas_used,
            access_list: receipt.access_list,
            deployed_contracts: receipt
                .deployed_contracts
                .iter()
                .map(|deployed| deployed.address.clone())
                .collect(),
            proofs: vec![],
        });
        receipt_index += 1;
    }

    output
}

fn build_call(
    tx: &OverlayTransaction,
    height: BlockNumber,
    view: &mut BlockStateView,
    output: &mut BlockExecutionOutput,
) -> Option<ExecutionCall> {
    let base = tx.base();
    let tx_inputs = bincode::serialize(&base.inputs).unwrap_or_default();
    let tx_outputs = bincode::serialize(&base.outputs).unwrap_or_default();

    match tx {
        OverlayTransaction::Generic(_) => None,
        OverlayTransaction::Deployment(deployment) => {
            // The contract row is recorded up front so the constructor (and
            // later transactions in the block) can resolve it; a reverted
            // constructor takes it back out.
            view.pending_bytecode.insert(
                deployment.contract_tweaked_pubkey,
                deployment.bytecode.clone(),
            );
            output.new_contracts.push(Contract {
                contract_address: deployment.contract_address.clone(),
                tweaked_pubkey: deployment.contract_tweaked_pubkey,
                deployer: deployment.deployer_pubkey,
                bytecode_hash: Contract::bytecode_hash_of(&deployment.bytecode),
                bytecode: deployment.bytecode.clone(),
                deployment_txid: tx.txid(),
                deployment_height: height,
            });

            Some(ExecutionCall {
                contract: deployment.contract_tweaked_pubkey,
                calldata: Vec::new(),
                caller: deployment.deployer_pubkey,
                value: 0,
                height,
                max_gas: MAX_GAS_PER_TX,
                is_deployment: true,
                bytecode: Some(deployment.bytecode.clone()),
                tx_inputs,
                tx_outputs,
            })
        }
        OverlayTransaction::Interaction(interaction) => {
            let value = base
                .outputs
                .iter()
                .filter(|output| output.address.as_deref() == Some(&interaction.contract_address))
                .map(|output| output.value)
                .sum();

            Some(ExecutionCall {
                contract: interaction.contract_tweaked_pubkey,
                calldata: interaction.calldata.clone(),
                caller: interaction.from_pubkey,
                value,
                height,
                max_gas: interaction.theoretical_gas_limit,
                is_deployment: false,
                bytecode: None,
                tx_inputs,
                tx_outputs,
            })
        }
    }
}
