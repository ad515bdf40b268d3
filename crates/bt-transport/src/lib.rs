//! # bt-transport
//!
//! Connection service for bt-p2p.
//!
//! This crate provides:
//! - Peer identity ([`PeerId`]) and peer references ([`PeerRef`])
//! - The [`Connector`] trait: open a protocol-negotiated byte stream to a peer
//! - The [`StreamHandler`] trait: serve inbound streams for one protocol
//! - TCP connector and listener with multistream-style protocol negotiation
//! - In-memory connector over `tokio::io::duplex` for tests and single-process use

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod peer;
pub mod tcp;
pub mod transport;

pub use memory::MemoryConnector;
pub use peer::{PeerId, PeerRef};
pub use tcp::{StreamListener, TcpConnector};
pub use transport::{
    BoxedStream, ByteStream, Connector, StreamHandler, TransportError, TransportResult,
};

use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for establishing a connection to one peer address
    pub connect_timeout: Duration,
    /// Deadline for protocol negotiation on a fresh stream
    pub negotiate_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            negotiate_timeout: Duration::from_secs(10),
        }
    }
}
