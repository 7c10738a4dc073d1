//! Submission builder and pending task handle

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec;
use crate::dispatch::Sender;
use crate::domain::{CorrelationId, Payload, TaskResult};
use crate::error::{FunctionsError, Result};
use crate::live::{Context, LiveObject};

use super::core::Manager;

/// Arguments of one function call
///
/// Every field except the function name is required; `Manager::submit`
/// rejects a submission with a missing field and names it.
pub struct Submission {
    function_name: String,
    event: Option<Result<Payload>>,
    public_member: Option<Arc<dyn LiveObject>>,
    internal_member: Option<Arc<dyn LiveObject>>,
    context: Option<Context>,
    sender: Option<Arc<dyn Sender>>,
}

impl Submission {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            event: None,
            public_member: None,
            internal_member: None,
            context: None,
            sender: None,
        }
    }

    /// Triggering event, encoded immediately
    pub fn event<E: Serialize + ?Sized>(mut self, event: &E) -> Self {
        self.event = Some(codec::encode(event));
        self
    }

    pub fn public_member(mut self, member: impl LiveObject + 'static) -> Self {
        let member: Arc<dyn LiveObject> = Arc::new(member);
        self.public_member = Some(member);
        self
    }

    pub fn internal_member(mut self, member: impl LiveObject + 'static) -> Self {
        let member: Arc<dyn LiveObject> = Arc::new(member);
        self.internal_member = Some(member);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Check every required field is present
    pub(crate) fn validate(self) -> Result<ValidSubmission> {
        debug!(function_name = %self.function_name, "Submission::validate: called");
        let event = self.event.ok_or_else(|| FunctionsError::missing("Event"))??;
        let public_member = self.public_member.ok_or_else(|| FunctionsError::missing("Public member"))?;
        let internal_member = self
            .internal_member
            .ok_or_else(|| FunctionsError::missing("Internal member"))?;
        let context = self.context.ok_or_else(|| FunctionsError::missing("Context"))?;
        let sender = self.sender.ok_or_else(|| FunctionsError::missing("Sender"))?;

        Ok(ValidSubmission {
            function_name: self.function_name,
            event,
            public_member,
            internal_member,
            context,
            sender,
        })
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("function_name", &self.function_name)
            .field("event", &self.event.is_some())
            .field("public_member", &self.public_member.is_some())
            .field("internal_member", &self.internal_member.is_some())
            .field("context", &self.context.is_some())
            .field("sender", &self.sender.is_some())
            .finish()
    }
}

/// Submission with every field present
pub(crate) struct ValidSubmission {
    pub function_name: String,
    pub event: Payload,
    pub public_member: Arc<dyn LiveObject>,
    pub internal_member: Arc<dyn LiveObject>,
    pub context: Context,
    pub sender: Arc<dyn Sender>,
}

/// Deadline armed at submission
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub at: Instant,
    pub millis: i64,
}

/// Handle to a submitted request
///
/// Completes exactly once: with the worker's result, with a timeout result
/// when the deadline passes first, or with an error result when the manager
/// is torn down. Dropping it unfinished withdraws the pending request.
#[derive(Debug)]
pub struct PendingTask {
    pub(crate) manager: Manager,
    pub(crate) correlation_id: CorrelationId,
    pub(crate) rx: oneshot::Receiver<TaskResult>,
    pub(crate) deadline: Option<Deadline>,
}

impl PendingTask {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the outcome
    pub async fn wait(mut self) -> TaskResult {
        debug!(correlation_id = %self.correlation_id, "PendingTask::wait: called");

        let outcome = match self.deadline {
            None => (&mut self.rx).await,
            Some(deadline) => match tokio::time::timeout_at(deadline.at, &mut self.rx).await {
                Ok(outcome) => outcome,
                Err(_) => return self.manager.expire(&self.correlation_id, deadline.millis, &mut self.rx),
            },
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(correlation_id = %self.correlation_id, "Request abandoned before a result arrived");
                abandoned(&self.manager, self.correlation_id.clone())
            }
        }
    }
}

impl Drop for PendingTask {
    // A handle dropped before completion takes its pending entry with it
    fn drop(&mut self) {
        self.manager.forget(&self.correlation_id);
    }
}

/// Error result for a request whose manager went away
pub(crate) fn abandoned(manager: &Manager, correlation_id: CorrelationId) -> TaskResult {
    let message = format!(
        "Request '{}' was abandoned: manager {} closed",
        correlation_id,
        manager.key()
    );
    TaskResult {
        component_name: manager.component_name().to_string(),
        state_machine_name: manager.state_machine_name().to_string(),
        ..TaskResult::error(correlation_id, message)
    }
}
