//! Dispatcher - turns send instructions into sender calls

use std::sync::Arc;

use tracing::debug;

use crate::codec;
use crate::domain::SendInstruction;
use crate::error::{FunctionsError, Result};
use crate::live::Context;

use super::sender::{CapabilityTable, Sender};

/// Capability table bound to one sender
pub struct Dispatcher {
    table: CapabilityTable,
}

impl Dispatcher {
    /// Build the table by letting the sender register its capabilities
    pub fn build(sender: Arc<dyn Sender>) -> Self {
        let mut table = CapabilityTable::default();
        sender.register(&mut table);
        debug!(capabilities = table.len(), "Dispatcher::build: table built");
        Self { table }
    }

    /// Fire each instruction in order, stopping at the first failure
    pub fn dispatch(&self, instructions: &[SendInstruction], context: &Context) -> Result<()> {
        debug!(count = instructions.len(), "Dispatcher::dispatch: called");
        for instruction in instructions {
            let capability = self
                .table
                .resolve(&instruction.name, instruction.use_context)
                .ok_or_else(|| FunctionsError::UnknownSender {
                    name: instruction.name.clone(),
                })?;

            let payload = codec::present(instruction.payload.as_ref());
            let context = instruction.use_context.then_some(context);
            debug!(name = %instruction.name, directed = instruction.use_context, "Dispatcher::dispatch: invoking");
            capability(context, payload)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("table", &self.table).finish()
    }
}
