//! funcbridge configuration types and loading

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::FunctionsConfiguration;

/// Default address the HTTP listener binds to
pub const DEFAULT_BIND: &str = "127.0.0.1:9676";

/// Main funcbridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,

    /// Function execution defaults
    pub functions: FunctionsSection,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Managers hosted by `funcbridge serve`
    pub managers: Vec<ManagerConfig>,

    /// String resources seeded into the registry
    #[serde(rename = "string-resources")]
    pub string_resources: Vec<StringResourceConfig>,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.funcbridge.yml`, then
    /// `<config_dir>/funcbridge/funcbridge.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", candidate.display(), e),
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; they resurface in the full `load`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::candidates(),
        };
        paths
            .iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::load_from_file(path).ok())
            .and_then(|config| config.log_level)
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(".funcbridge.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("funcbridge").join("funcbridge.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config
            .functions
            .to_configuration()
            .validate()
            .context("Invalid functions section")?;

        debug!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address workers connect to
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 9676))),
        }
    }
}

/// Function execution defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsSection {
    /// Per-request deadline; absent means no deadline
    #[serde(rename = "timeout-ms", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

impl FunctionsSection {
    pub fn to_configuration(&self) -> FunctionsConfiguration {
        FunctionsConfiguration {
            timeout_in_millis: self.timeout_ms,
        }
    }
}

/// A (component, state machine) pair to host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub component: String,

    #[serde(rename = "state-machine")]
    pub state_machine: String,

    /// Listener address; defaults to `server.bind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<SocketAddr>,
}

/// A string resource entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringResourceConfig {
    pub component: String,
    pub key: String,
    pub value: String,
}
