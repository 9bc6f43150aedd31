//! PSBT processor plug-points.
//!
//! Admission dispatches each PSBT to the processor registered for its type.
//! No processor is currently active (the unwrap processor is disabled), but
//! the dispatch table is the extension point later processors slot into.

use std::collections::HashMap;

use bitcoin::Psbt;

use crate::AdmissionError;

/// Discriminator for PSBT handling. Read from the first byte of the
/// submitted payload's type tag; `Plain` when no tag is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PsbtType {
    Plain,
    Unwrap,
}

/// Result of running one processor over a PSBT.
#[derive(Debug, Clone)]
pub struct ProcessedPsbt {
    pub psbt: Psbt,
    pub modified: bool,
    pub finalized: bool,
}

pub trait PsbtProcessor: Send + Sync {
    fn psbt_type(&self) -> PsbtType;
    fn process(&self, psbt: Psbt) -> Result<ProcessedPsbt, AdmissionError>;
}

#[derive(Default)]
pub struct PsbtDispatcher {
    processors: HashMap<PsbtType, Box<dyn PsbtProcessor>>,
}

impl std::fmt::Debug for PsbtDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsbtDispatcher")
            .field("processors", &self.processors.len())
            .finish()
    }
}

impl PsbtDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Box<dyn PsbtProcessor>) {
        self.processors.insert(processor.psbt_type(), processor);
    }

    /// Runs the registered processor, or passes the PSBT through untouched
    /// when none is registered for its type.
    pub fn process(
        &self,
        psbt_type: PsbtType,
        psbt: Psbt,
    ) -> Result<ProcessedPsbt, AdmissionError> {
        match self.processors.get(&psbt_type) {
            Some(processor) => processor.process(psbt),
            None => {
                let finalized = is_finalized(&psbt);
                Ok(ProcessedPsbt {
                    psbt,
                    modified: false,
                    finalized,
                })
            }
        }
    }
}

/// A PSBT is finalised when every input carries its final witness or
/// script-sig.
pub fn is_finalized(psbt: &Psbt) -> bool {
    !psbt.inputs.is_empty()
        && psbt
            .inputs
            .iter()
            .all(|input| input.final_script_witness.is_some() || input.final_script_sig.is_some())
}
