//! CLI command definitions and subcommands

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

/// Default endpoint worker commands talk to
pub const DEFAULT_URL: &str = "http://127.0.0.1:9676";

/// funcbridge - route state machine functions to external workers
#[derive(Parser)]
#[command(
    name = "funcbridge",
    about = "Queue state machine functions for external workers and apply their results",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host the configured managers until interrupted
    Serve {
        /// Override `server.bind` from the config file
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Fetch one task as a worker would and print it as JSON
    Poll {
        /// Component name
        #[arg(short = 'C', long)]
        component: String,

        /// State machine name
        #[arg(short = 's', long = "state-machine")]
        state_machine: String,

        /// funcbridge endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },

    /// Post a function result read from a JSON file
    Resolve {
        /// File containing the result
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// funcbridge endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },

    /// Set the per-request timeout; omit to remove it
    SetTimeout {
        /// Timeout in milliseconds
        #[arg(value_name = "MS")]
        ms: Option<i64>,

        /// funcbridge endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },

    /// List string resources
    Resources {
        /// funcbridge endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },
}

/// Get the path to the log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("funcbridge")
        .join("logs")
        .join("funcbridge.log")
}

/// Generate the after_help text with file locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let user_config = dirs::config_dir()
        .map(|dir| dir.join("funcbridge").join("funcbridge.yml").display().to_string())
        .unwrap_or_else(|| "(no config dir)".to_string());

    format!(
        "{}\n  ./.funcbridge.yml\n  {}\n\n{}\n  {}\n",
        "Config files:".bold(),
        user_config,
        "Logs:".bold(),
        get_log_path().display()
    )
}
