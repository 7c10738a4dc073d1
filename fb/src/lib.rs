//! funcbridge - route state machine functions to external workers
//!
//! A state machine hands a function call to the bridge instead of running it
//! in-process. The call is queued per (component, state machine); an external
//! worker polls it over HTTP, computes new member values and follow-up
//! transitions, and posts the result back. The bridge wakes the waiting caller,
//! copies the new values onto the live members and fires the requested
//! transitions through the caller's sender.
//!
//! # Modules
//!
//! - [`registry`] - Process-wide routing of managers by key
//! - [`manager`] - Task queue, pending requests and result application
//! - [`dispatch`] - Named transitions fired after a function completes
//! - [`live`] - Shared live objects updated in place
//! - [`codec`] - JSON payload encoding
//! - [`http`] - Worker-facing HTTP routes and client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod http;
pub mod live;
pub mod manager;
pub mod registry;

pub use config::Config;
pub use dispatch::{CapabilityTable, Dispatcher, Sender, SenderId};
pub use domain::{
    CorrelationId, FunctionsConfiguration, KeyValueSetting, ManagerKey, Payload, SendInstruction,
    SharedConfiguration, TaskParameter, TaskResult,
};
pub use error::{FunctionsError, Result};
pub use http::{HttpBinder, WorkerClient};
pub use live::{Context, Live, LiveObject, context};
pub use manager::{Manager, PendingTask, Submission};
pub use registry::{EndpointBinder, NoopBinder, Registry};
