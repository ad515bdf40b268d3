//! In-process connection service.
//!
//! Streams are `tokio::io::duplex` pairs: the dialer keeps one half and the
//! registered handler is spawned on the other. Negotiation is a table lookup.

use crate::peer::{PeerId, PeerRef};
use crate::transport::{BoxedStream, Connector, StreamHandler, TransportError, TransportResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Duplex buffer size per stream
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Connector that dispatches to handlers registered in the same process
#[derive(Default, Clone)]
pub struct MemoryConnector {
    peers: Arc<DashMap<PeerId, HashMap<String, Arc<dyn StreamHandler>>>>,
    opened: Arc<AtomicU64>,
}

impl MemoryConnector {
    /// Create an empty connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `protocol` for `peer` with `handler`
    pub fn register(&self, peer: PeerId, protocol: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        self.peers
            .entry(peer)
            .or_default()
            .insert(protocol.into(), handler);
    }

    /// Remove a peer and all its handlers
    pub fn unregister(&self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    /// Number of streams opened so far
    #[must_use]
    pub fn streams_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open_stream(&self, peer: &PeerRef, protocol: &str) -> TransportResult<BoxedStream> {
        let handler = {
            let protocols = self.peers.get(&peer.id).ok_or_else(|| {
                TransportError::ConnectionFailed(format!("peer {} not reachable", peer.id.short()))
            })?;
            protocols
                .get(protocol)
                .cloned()
                .ok_or_else(|| TransportError::UnsupportedProtocol(protocol.to_string()))?
        };

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        self.opened.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            handler.handle(Box::new(server), None).await;
        });

        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Greeter;

    #[async_trait]
    impl StreamHandler for Greeter {
        async fn handle(&self, mut stream: BoxedStream, remote: Option<SocketAddr>) {
            assert!(remote.is_none());
            let _ = stream.write_all(b"hi").await;
            let _ = stream.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_memory_stream_dispatch() {
        let connector = MemoryConnector::new();
        let id = PeerId::random();
        connector.register(id, "/greet", Arc::new(Greeter));

        let mut stream = connector
            .open_stream(&PeerRef::new(id, Vec::new()), "/greet")
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"hi");
        assert_eq!(connector.streams_opened(), 1);
    }

    #[tokio::test]
    async fn test_memory_unknown_peer() {
        let connector = MemoryConnector::new();
        let result = connector
            .open_stream(&PeerRef::new(PeerId::random(), Vec::new()), "/greet")
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_memory_unknown_protocol() {
        let connector = MemoryConnector::new();
        let id = PeerId::random();
        connector.register(id, "/greet", Arc::new(Greeter));

        let result = connector
            .open_stream(&PeerRef::new(id, Vec::new()), "/other")
            .await;
        assert!(matches!(result, Err(TransportError::UnsupportedProtocol(_))));
    }

    #[tokio::test]
    async fn test_memory_unregister() {
        let connector = MemoryConnector::new();
        let id = PeerId::random();
        connector.register(id, "/greet", Arc::new(Greeter));
        connector.unregister(&id);

        let result = connector
            .open_stream(&PeerRef::new(id, Vec::new()), "/greet")
            .await;
        assert!(result.is_err());
    }
}
