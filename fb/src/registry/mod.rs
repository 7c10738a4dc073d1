//! Process-wide routing of managers by (component, state machine)
//!
//! The [`Registry`] is the lookup table the transport layer routes worker
//! traffic through, plus the settings shared by every manager it owns.

mod binder;
mod core;

pub use binder::{EndpointBinder, NoopBinder};
pub use core::Registry;
