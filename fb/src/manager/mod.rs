//! Per-(component, state machine) function managers
//!
//! A [`Manager`] owns the FIFO task queue workers poll, the set of requests
//! awaiting a result, and the senders registered by submitters. Submitting
//! returns a [`PendingTask`] that completes exactly once.

mod core;
mod submission;

pub use core::Manager;
pub use submission::{PendingTask, Submission};
