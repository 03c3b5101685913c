//! Coordinator discovery across the monitor cluster.
//!
//! Coordinator status is a flag each node is configured with. Discovery
//! polls every peer for that flag and reports what it hears back; it does
//! not elect, negotiate or fence anything.

mod discovery;
mod http;

pub use discovery::*;
pub use http::*;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Reasons a peer is considered unreachable.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("peer timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid response body: {0:?}")]
    InvalidBody(String),
}

/// Asks a single peer whether it is configured as coordinator.
pub trait CoordinatorProbe: Send + Sync {
    fn query_coordinator_flag(&self, address: &str) -> impl Future<Output = Result<bool, PeerError>> + Send;
}
