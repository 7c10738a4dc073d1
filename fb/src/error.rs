//! Error types for the function bridge

use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::CorrelationId;

/// Errors raised by the registry, managers and dispatcher
///
/// Everything except [`FunctionsError::DuplicateKey`] and [`FunctionsError::Bind`]
/// is a validation failure: the caller supplied something the bridge cannot act
/// on. Validation failures are the only errors surfaced over HTTP.
#[derive(Debug, Error)]
pub enum FunctionsError {
    #[error("{0}")]
    Validation(String),

    #[error("A function manager is already registered for: {component},{state_machine}")]
    DuplicateKey { component: String, state_machine: String },

    #[error("No manager found for component '{component}' and state machine '{state_machine}'")]
    UnknownKey { component: String, state_machine: String },

    #[error("Unknown request id '{0}'")]
    UnknownRequest(CorrelationId),

    #[error("Unknown sender '{name}'")]
    UnknownSender { name: String },

    #[error("Couldn't deserialize object {raw}: {source}")]
    Decode {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Couldn't serialize object: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to bind endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl FunctionsError {
    /// Build a validation error for a required argument that was not supplied
    pub fn missing(argument: &str) -> Self {
        Self::Validation(format!("{argument} should not be null"))
    }

    /// Whether this error is a validation failure (client error)
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::DuplicateKey { .. } | Self::Bind { .. })
    }
}

/// Result alias used across the crate
pub type Result<T, E = FunctionsError> = std::result::Result<T, E>;
