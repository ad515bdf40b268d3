//! Discovery error types.

use std::time::Duration;
use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The search completed without finding a provider
    #[error("No providers found for file {0}")]
    ProviderNotFound(String),

    /// The search deadline elapsed before any provider was found
    #[error("Timed out after {0:?} without finding providers for file {1}")]
    ProviderTimeout(Duration, String),

    /// Announcing this node as a provider failed
    #[error("Announce failed: {0}")]
    Announce(String),

    /// The operation was cancelled
    #[error("Discovery cancelled")]
    Cancelled,

    /// Malformed registry message
    #[error("Registry message error: {0}")]
    Message(#[from] crate::registry::MessageError),

    /// Registry request failed
    #[error("Registry request to {0} failed: {1}")]
    Registry(std::net::SocketAddr, String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;
