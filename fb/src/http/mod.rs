//! HTTP transport
//!
//! Workers poll tasks and post results over HTTP. The server side is an axum
//! router over a [`Registry`](crate::registry::Registry); [`HttpBinder`] runs
//! one listener per address for the managers bound to it. [`WorkerClient`] is
//! the matching client used by the CLI and integration tests.

mod client;
mod server;

pub use client::WorkerClient;
pub use server::{ErrorBody, HttpBinder, router};
