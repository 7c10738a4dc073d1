//! Sender capability contract
//!
//! A state machine's sender exposes its transitions by registering them in a
//! [`CapabilityTable`] once, when the bridge first sees the sender. Each entry
//! is a closure that decodes the worker's payload into the event type the
//! transition expects and then calls it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec;
use crate::domain::Payload;
use crate::error::{FunctionsError, Result};
use crate::live::Context;

/// Decode-then-invoke entry for one transition
pub(crate) type Capability = Box<dyn Fn(Option<&Context>, Option<&Payload>) -> Result<()> + Send + Sync>;

/// Application-supplied object that fires follow-up transitions
pub trait Sender: Send + Sync + 'static {
    /// Register every transition this sender can fire
    fn register(self: Arc<Self>, table: &mut CapabilityTable);
}

/// Identity of a sender handle (address of the shared allocation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(usize);

impl SenderId {
    pub fn of(sender: &Arc<dyn Sender>) -> Self {
        Self(Arc::as_ptr(sender) as *const () as usize)
    }
}

/// Capabilities of one sender keyed by (name, directed)
#[derive(Default)]
pub struct CapabilityTable {
    entries: HashMap<(String, bool), Capability>,
}

impl CapabilityTable {
    /// Register a transition addressed to the submitting context
    ///
    /// The callback receives the context, the decoded event (`None` when the
    /// worker sent no payload) and the routing topic, which is always `None`.
    pub fn directed<E, F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        E: DeserializeOwned + 'static,
        F: Fn(&Context, Option<E>, Option<&str>) + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(%name, "CapabilityTable::directed: registering");
        let capability = move |context: Option<&Context>, payload: Option<&Payload>| -> Result<()> {
            let context = context.ok_or_else(|| FunctionsError::missing("Context"))?;
            let event = payload.map(codec::decode::<E>).transpose()?;
            callback(context, event, None);
            Ok(())
        };
        self.entries.insert((name, true), Box::new(capability));
        self
    }

    /// Register the broadcast entry point for an event name
    ///
    /// Broadcasts carry only the decoded event: no context, no topic.
    pub fn broadcast<E, F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        E: DeserializeOwned + 'static,
        F: Fn(Option<E>) + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(%name, "CapabilityTable::broadcast: registering");
        let capability = move |_context: Option<&Context>, payload: Option<&Payload>| -> Result<()> {
            let event = payload.map(codec::decode::<E>).transpose()?;
            callback(event);
            Ok(())
        };
        self.entries.insert((name, false), Box::new(capability));
        self
    }

    pub(crate) fn resolve(&self, name: &str, directed: bool) -> Option<&Capability> {
        self.entries.get(&(name.to_string(), directed))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("CapabilityTable").field("entries", &names).finish()
    }
}
