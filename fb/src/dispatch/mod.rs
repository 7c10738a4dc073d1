//! Dynamic sender dispatch
//!
//! Workers name the transitions to fire after a function completes. The
//! dispatcher resolves each name against the capability table its sender
//! registered, decodes the payload into the expected event type and fires the
//! transition, strictly in the order the worker declared.

mod dispatcher;
mod sender;

pub use dispatcher::Dispatcher;
pub use sender::{CapabilityTable, Sender, SenderId};
