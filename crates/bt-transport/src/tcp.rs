//! TCP connection service with protocol negotiation.
//!
//! Every stream starts with a one-line negotiation before any protocol bytes:
//!
//! ```text
//! dialer   -> listener : "<protocol-id>\n"
//! listener -> dialer   : "<protocol-id>\n"   (supported)
//!                        <close>              (not supported)
//! ```
//!
//! After the echo the stream belongs to the protocol handler. One TCP
//! connection carries exactly one stream.

use crate::TransportConfig;
use crate::peer::PeerRef;
use crate::transport::{
    BoxedStream, Connector, MAX_PROTOCOL_LEN, StreamHandler, TransportError, TransportResult,
    negotiate_outbound, read_line, write_line,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Pause after a failed `accept()` so persistent errors (EMFILE) do not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Dials peers over TCP
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TransportConfig,
}

impl TcpConnector {
    /// Create a connector with the given deadlines
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    async fn dial(&self, peer: &PeerRef) -> TransportResult<TcpStream> {
        let mut last_error = format!("peer {} has no addresses", peer.id.short());

        for addr in &peer.addrs {
            match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Connect to {} ({}) failed: {}", peer.id.short(), addr, e);
                    last_error = format!("{addr}: {e}");
                }
                Err(_) => {
                    tracing::debug!("Connect to {} ({}) timed out", peer.id.short(), addr);
                    last_error = format!("{addr}: connect timed out");
                }
            }
        }

        Err(TransportError::ConnectionFailed(last_error))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open_stream(&self, peer: &PeerRef, protocol: &str) -> TransportResult<BoxedStream> {
        let mut stream = self.dial(peer).await?;

        timeout(
            self.config.negotiate_timeout,
            negotiate_outbound(&mut stream, protocol),
        )
        .await
        .map_err(|_| TransportError::Timeout("protocol negotiation"))??;

        Ok(Box::new(stream))
    }
}

/// Counters for a [`StreamListener`]
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Connections accepted
    pub accepted: AtomicU64,
    /// Streams handed to a handler
    pub dispatched: AtomicU64,
    /// Streams dropped during negotiation
    pub rejected: AtomicU64,
}

/// Accepts TCP connections and routes negotiated streams to handlers
pub struct StreamListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    handlers: HashMap<String, Arc<dyn StreamHandler>>,
    negotiate_timeout: Duration,
    stats: Arc<ListenerStats>,
}

impl StreamListener {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the socket cannot be bound.
    pub async fn bind<A: Into<SocketAddr>>(addr: A, config: &TransportConfig) -> TransportResult<Self> {
        let addr = addr.into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        Ok(Self {
            listener,
            local_addr,
            handlers: HashMap::new(),
            negotiate_timeout: config.negotiate_timeout,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared counters, readable while the listener runs
    #[must_use]
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Route streams negotiated for `protocol` to `handler`
    pub fn register(&mut self, protocol: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol.into(), handler);
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Each connection is negotiated and handled on its own task; there is no
    /// cap on concurrent inbound streams.
    pub async fn run(self, cancel: CancellationToken) {
        let handlers = Arc::new(self.handlers);
        tracing::info!("Listening for streams on {}", self.local_addr);

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote)) => {
                    self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(handle_inbound(
                        stream,
                        remote,
                        Arc::clone(&handlers),
                        self.negotiate_timeout,
                        Arc::clone(&self.stats),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Accept failed on {}: {}", self.local_addr, e);
                    if !accept_backoff(&cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Listener on {} stopped", self.local_addr);
    }
}

/// Wait out [`ACCEPT_BACKOFF`]; `false` if `cancel` fired meanwhile.
async fn accept_backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

async fn handle_inbound(
    mut stream: TcpStream,
    remote: SocketAddr,
    handlers: Arc<HashMap<String, Arc<dyn StreamHandler>>>,
    negotiate_timeout: Duration,
    stats: Arc<ListenerStats>,
) {
    let negotiated = timeout(negotiate_timeout, async {
        let protocol = read_line(&mut stream, MAX_PROTOCOL_LEN).await?;
        match handlers.get(&protocol) {
            Some(handler) => {
                write_line(&mut stream, &protocol).await?;
                Ok::<_, TransportError>(Arc::clone(handler))
            }
            None => Err(TransportError::UnsupportedProtocol(protocol)),
        }
    })
    .await
    .unwrap_or(Err(TransportError::Timeout("protocol negotiation")));

    match negotiated {
        Ok(handler) => {
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            handler.handle(Box::new(stream), Some(remote)).await;
        }
        Err(e) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropping inbound stream from {}: {}", remote, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TEST_PROTOCOL: &str = "/bt/test/1.0.0";

    /// Echoes everything it reads until EOF
    struct Echo;

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle(&self, mut stream: BoxedStream, _remote: Option<SocketAddr>) {
            let mut buf = Vec::new();
            if stream.read_to_end(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
                let _ = stream.shutdown().await;
            }
        }
    }

    async fn spawn_listener() -> (SocketAddr, CancellationToken, Arc<ListenerStats>) {
        let config = TransportConfig::default();
        let mut listener = StreamListener::bind(
            "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            &config,
        )
        .await
        .unwrap();
        listener.register(TEST_PROTOCOL, Arc::new(Echo));
        let addr = listener.local_addr();
        let stats = listener.stats();
        let cancel = CancellationToken::new();
        tokio::spawn(listener.run(cancel.clone()));
        (addr, cancel, stats)
    }

    #[tokio::test]
    async fn test_tcp_bind_assigns_port() {
        let listener = StreamListener::bind(
            "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            &TransportConfig::default(),
        )
        .await
        .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_tcp_open_stream_roundtrip() {
        let (addr, cancel, stats) = spawn_listener().await;
        let peer = PeerRef::new(PeerId::random(), vec![addr]);

        let connector = TcpConnector::default();
        let mut stream = connector.open_stream(&peer, TEST_PROTOCOL).await.unwrap();
        stream.write_all(b"hello stream").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"hello stream");
        assert_eq!(stats.dispatched.load(Ordering::Relaxed), 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tcp_unsupported_protocol() {
        let (addr, cancel, _stats) = spawn_listener().await;
        let peer = PeerRef::new(PeerId::random(), vec![addr]);

        let result = TcpConnector::default()
            .open_stream(&peer, "/bt/unknown/1.0.0")
            .await;
        assert!(matches!(result, Err(TransportError::UnsupportedProtocol(_))));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tcp_falls_through_to_reachable_address() {
        let (addr, cancel, _stats) = spawn_listener().await;

        // Bind and drop to get a port that refuses connections.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let peer = PeerRef::new(PeerId::random(), vec![dead_addr, addr]);
        let stream = TcpConnector::default().open_stream(&peer, TEST_PROTOCOL).await;
        assert!(stream.is_ok());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tcp_no_addresses() {
        let peer = PeerRef::new(PeerId::random(), Vec::new());
        let result = TcpConnector::default().open_stream(&peer, TEST_PROTOCOL).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_accept_backoff() {
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();
        assert!(accept_backoff(&cancel).await);
        assert!(start.elapsed() >= ACCEPT_BACKOFF);

        cancel.cancel();
        let start = std::time::Instant::now();
        assert!(!accept_backoff(&cancel).await);
        assert!(start.elapsed() < ACCEPT_BACKOFF);
    }
}
