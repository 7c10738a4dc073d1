//! Task parameter and task result wire types
//!
//! Field names follow the worker protocol (PascalCase, `RequestId`, `Senders`).

use serde::{Deserialize, Serialize};

use super::id::CorrelationId;

/// Encoded value exchanged with workers
pub type Payload = serde_json::Value;

/// A queued function call, handed to a worker by `dequeue`
///
/// Built once at submission from encoded snapshots of the caller's objects.
/// Later mutation of the live objects never reaches an already-queued entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskParameter {
    #[serde(rename = "RequestId")]
    pub correlation_id: CorrelationId,
    pub component_name: String,
    pub state_machine_name: String,
    pub function_name: String,
    pub event: Payload,
    pub public_member: Payload,
    pub internal_member: Payload,
}

/// One follow-up transition requested by a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendInstruction {
    /// Capability name on the sender
    #[serde(rename = "SenderName")]
    pub name: String,

    /// Encoded event, absent for parameterless transitions
    #[serde(rename = "SenderParameter", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    /// Directed to the submitting context (true) or broadcast (false)
    #[serde(rename = "UseContext", default)]
    pub use_context: bool,
}

impl SendInstruction {
    /// Instruction addressed to the current context
    pub fn directed(name: impl Into<String>, payload: Option<Payload>) -> Self {
        Self {
            name: name.into(),
            payload,
            use_context: true,
        }
    }

    /// Instruction fanned out with no addressee
    pub fn broadcast(name: impl Into<String>, payload: Option<Payload>) -> Self {
        Self {
            name: name.into(),
            payload,
            use_context: false,
        }
    }
}

/// Outcome of a function call, posted by a worker or synthesized locally
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskResult {
    #[serde(rename = "RequestId")]
    pub correlation_id: CorrelationId,
    pub component_name: String,
    pub state_machine_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_member: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_member: Option<Payload>,
    #[serde(rename = "Senders")]
    pub send_instructions: Vec<SendInstruction>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskResult {
    /// Result addressed to a pending request
    pub fn for_request(parameter: &TaskParameter) -> Self {
        Self {
            correlation_id: parameter.correlation_id.clone(),
            component_name: parameter.component_name.clone(),
            state_machine_name: parameter.state_machine_name.clone(),
            ..Default::default()
        }
    }

    /// Synthetic error result delivered instead of a worker result
    pub fn error(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            is_error: true,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_public_member(mut self, payload: Payload) -> Self {
        self.public_member = Some(payload);
        self
    }

    pub fn with_internal_member(mut self, payload: Payload) -> Self {
        self.internal_member = Some(payload);
        self
    }

    pub fn with_instruction(mut self, instruction: SendInstruction) -> Self {
        self.send_instructions.push(instruction);
        self
    }
}
