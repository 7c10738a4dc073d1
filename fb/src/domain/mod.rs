//! Domain types for the function bridge
//!
//! Wire types exchanged with workers (TaskParameter, TaskResult, SendInstruction)
//! and the process-wide settings (configuration, string resources).

mod id;
mod settings;
mod task;

pub use id::{CorrelationId, ManagerKey};
pub use settings::{FunctionsConfiguration, KeyValueSetting, SharedConfiguration};
pub use task::{Payload, SendInstruction, TaskParameter, TaskResult};
