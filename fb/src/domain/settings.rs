//! Process-wide function settings: timeout configuration and string resources

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FunctionsError, Result};

/// Configuration posted to `/Configuration`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionsConfiguration {
    /// Deadline for each submitted request; `None` waits forever
    #[serde(default)]
    pub timeout_in_millis: Option<i64>,
}

impl FunctionsConfiguration {
    /// Configuration with a bounded timeout
    pub fn with_timeout_ms(timeout_ms: i64) -> Self {
        Self {
            timeout_in_millis: Some(timeout_ms),
        }
    }

    /// Configuration with no deadline
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Reject non-positive timeouts
    pub fn validate(&self) -> Result<()> {
        match self.timeout_in_millis {
            Some(ms) if ms <= 0 => Err(FunctionsError::Validation(format!("Invalid timeout value: {ms}"))),
            _ => Ok(()),
        }
    }

    /// Timeout as a Duration, if bounded
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_in_millis
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }
}

/// Shared configuration cell
///
/// Cloned into every Manager. Readers see the latest value on their next read.
#[derive(Debug, Clone, Default)]
pub struct SharedConfiguration(Arc<RwLock<FunctionsConfiguration>>);

impl SharedConfiguration {
    pub fn new(initial: FunctionsConfiguration) -> Result<Self> {
        initial.validate()?;
        Ok(Self(Arc::new(RwLock::new(initial))))
    }

    /// Current configuration
    pub fn get(&self) -> FunctionsConfiguration {
        *self.0.read()
    }

    /// Validate and replace; on failure the previous value stays in force
    pub fn set(&self, config: FunctionsConfiguration) -> Result<()> {
        debug!(?config, "SharedConfiguration::set: called");
        config.validate()?;
        *self.0.write() = config;
        Ok(())
    }
}

/// One entry of the string resources list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValueSetting {
    pub component_name: String,
    pub key: String,
    pub value: String,
}

impl KeyValueSetting {
    pub fn new(component_name: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}
