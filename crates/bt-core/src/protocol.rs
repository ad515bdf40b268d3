//! Chunk transfer protocol.
//!
//! One stream per chunk request:
//!
//! ```text
//! client -> server : "<decimal index>\n"
//! server -> client : raw chunk bytes (<= chunk size), then end of stream
//! ```
//!
//! There is no length prefix and no error reply; the server closes the stream
//! without writing when it cannot serve the request.

use crate::config::TransferConfig;
use bt_files::chunker;
use bt_transport::transport::{read_line, write_line};
use bt_transport::{BoxedStream, Connector, PeerRef, StreamHandler, TransportError, TransportResult};
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

/// Protocol ID negotiated on every chunk stream
pub const PROTOCOL_ID: &str = "/bt/file/1.0.0";

/// Longest request line the server accepts
pub const MAX_REQUEST_LINE: usize = 32;

/// Parse a request line into a chunk index.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] unless the line is a non-negative decimal integer.
pub fn parse_request_line(line: &str) -> TransportResult<u64> {
    let trimmed = line.trim();
    trimmed
        .parse::<u64>()
        .map_err(|_| TransportError::Protocol(format!("invalid chunk index {trimmed:?}")))
}

/// Serves chunks of one seeded file
pub struct ChunkServer {
    path: PathBuf,
    config: TransferConfig,
    served: AtomicU64,
    rejected: AtomicU64,
}

impl ChunkServer {
    /// Serve `path` using `config.chunk_size` chunks
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, config: TransferConfig) -> Self {
        Self {
            path: path.into(),
            config,
            served: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Seeded file
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Chunks written to clients so far
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Streams closed without a response
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    async fn serve(&self, stream: &mut BoxedStream) -> crate::Result<(u64, usize)> {
        let line = timeout(
            self.config.read_timeout,
            read_line(stream, MAX_REQUEST_LINE),
        )
        .await
        .map_err(|_| TransportError::Timeout("request read"))??;

        let index = parse_request_line(&line)?;

        let path = self.path.clone();
        let chunk_size = self.config.chunk_size;
        let data = tokio::task::spawn_blocking(move || {
            let file = File::open(&path)
                .map_err(|e| bt_files::FilesError::io(format!("open {}", path.display()), e))?;
            chunker::read_chunk(&file, index, chunk_size)
        })
        .await??;

        timeout(self.config.write_timeout, async {
            stream.write_all(&data).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| TransportError::Timeout("response write"))?
        .map_err(TransportError::Io)?;

        Ok((index, data.len()))
    }
}

#[async_trait::async_trait]
impl StreamHandler for ChunkServer {
    async fn handle(&self, mut stream: BoxedStream, remote: Option<SocketAddr>) {
        let remote = remote.map_or_else(|| "local".to_string(), |a| a.to_string());

        match timeout(self.config.stream_timeout, self.serve(&mut stream)).await {
            Ok(Ok((index, len))) => {
                self.served.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Served chunk {} ({} bytes) to {}", index, len, remote);
            }
            Ok(Err(e)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Closing stream from {}: {}", remote, e);
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Stream from {} exceeded its lifetime", remote);
            }
        }
    }
}

/// Acceptable response length for a requested chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLength {
    /// Exactly this many bytes (every chunk but the last)
    Exact(usize),
    /// Between 1 and this many bytes (the last chunk)
    UpTo(usize),
}

impl ExpectedLength {
    /// Whether a response of `len` bytes is acceptable
    #[must_use]
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Self::Exact(n) => len == n,
            Self::UpTo(n) => len > 0 && len <= n,
        }
    }

    /// Largest acceptable length
    #[must_use]
    pub fn max(self) -> usize {
        match self {
            Self::Exact(n) | Self::UpTo(n) => n,
        }
    }
}

/// Fetches single chunks from peers
#[derive(Clone)]
pub struct ChunkClient {
    connector: Arc<dyn Connector>,
    config: TransferConfig,
}

impl ChunkClient {
    /// Create a client dialing through `connector`
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: TransferConfig) -> Self {
        Self { connector, config }
    }

    /// Protocol deadlines
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Request chunk `index` from `peer`.
    ///
    /// `cancel` is observed only while the stream is being opened. Once the
    /// request is on the wire the exchange runs until it completes or one of
    /// its deadlines elapses.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] when any deadline elapses
    /// - [`TransportError::Protocol`] when the response length is unacceptable
    /// - [`TransportError::Cancelled`] when `cancel` fires before the stream is open
    /// - any error from opening the stream
    pub async fn fetch(
        &self,
        peer: &PeerRef,
        index: u64,
        expected: ExpectedLength,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<u8>> {
        let deadline = Instant::now() + self.config.stream_timeout;

        let open = timeout(
            self.config.connect_timeout,
            self.connector.open_stream(peer, PROTOCOL_ID),
        );
        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = timeout_at(deadline, open) => {
                result
                    .map_err(|_| TransportError::Timeout("stream lifetime"))?
                    .map_err(|_| TransportError::Timeout("connect"))??
            }
        };

        let exchange = async {
            timeout(
                self.config.write_timeout,
                write_line(&mut stream, &index.to_string()),
            )
            .await
            .map_err(|_| TransportError::Timeout("request write"))??;

            timeout(
                self.config.read_timeout,
                read_response(&mut stream, expected.max()),
            )
            .await
            .map_err(|_| TransportError::Timeout("response read"))?
        };
        let data = timeout_at(deadline, exchange)
            .await
            .map_err(|_| TransportError::Timeout("stream lifetime"))??;

        if !expected.accepts(data.len()) {
            return Err(TransportError::Protocol(format!(
                "chunk {index}: got {} bytes, expected {expected:?}",
                data.len()
            )));
        }

        tracing::trace!("Fetched chunk {} ({} bytes) from {}", index, data.len(), peer.id.short());
        Ok(data)
    }
}

/// Read until `max` bytes are buffered or the stream ends.
async fn read_response<S>(stream: &mut S, max: usize) -> TransportResult<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; max];
    let mut filled = 0;
    while filled < max {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
