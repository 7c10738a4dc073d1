//! Endpoint binding seam between the registry and its transport

use std::net::SocketAddr;

use async_trait::async_trait;

use super::Registry;
use crate::error::Result;

/// Attaches a registry to a network endpoint on behalf of a Manager
///
/// `bind` and `release` calls for the same address are balanced by the
/// registry: every successful `bind` is followed by exactly one `release`.
#[async_trait]
pub trait EndpointBinder: Send + Sync {
    /// Make `registry` reachable at `addr`
    async fn bind(&self, addr: SocketAddr, registry: Registry) -> Result<()>;

    /// Drop one binding at `addr`
    async fn release(&self, addr: SocketAddr);
}

/// Binder for in-process use: nothing is exposed on the network
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBinder;

#[async_trait]
impl EndpointBinder for NoopBinder {
    async fn bind(&self, _addr: SocketAddr, _registry: Registry) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _addr: SocketAddr) {}
}
