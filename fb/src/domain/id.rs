//! Correlation IDs and manager routing keys
//!
//! Fresh IDs are UUID v7 strings, so they sort by submission time in logs.
//! IDs posted back by workers are arbitrary strings and are only ever compared.

use serde::{Deserialize, Serialize};

/// Token identifying one submit/resolve pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, globally unique ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Get the full ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Routing key of a Manager: (component, state machine)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerKey {
    pub component_name: String,
    pub state_machine_name: String,
}

impl ManagerKey {
    pub fn new(component_name: impl Into<String>, state_machine_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            state_machine_name: state_machine_name.into(),
        }
    }
}

impl std::fmt::Display for ManagerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.component_name, self.state_machine_name)
    }
}
