//! Connection service abstraction.
//!
//! A [`Connector`] opens one bidirectional byte stream to a peer for a named
//! protocol. A [`StreamHandler`] serves the inbound side of one protocol.
//! Streams are plain `AsyncRead + AsyncWrite` objects; the end of a response is
//! signalled by the writer shutting its half down.

use crate::peer::PeerRef;
use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest protocol ID accepted during negotiation.
pub const MAX_PROTOCOL_LEN: usize = 256;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not bind a listener
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// Could not connect to any of the peer's addresses
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A deadline elapsed
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The remote does not speak the requested protocol
    #[error("Protocol not supported by peer: {0}")]
    UnsupportedProtocol(String),

    /// Malformed data on the stream
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ByteStream for T {}

/// Owned, type-erased stream
pub type BoxedStream = Box<dyn ByteStream>;

/// Opens protocol-negotiated streams to peers
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `peer` speaking `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] when no address is reachable,
    /// [`TransportError::UnsupportedProtocol`] when the peer rejects `protocol`,
    /// and [`TransportError::Timeout`] when a deadline elapses.
    async fn open_stream(&self, peer: &PeerRef, protocol: &str) -> TransportResult<BoxedStream>;
}

/// Serves inbound streams for one protocol
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Handle one inbound stream. The handler owns the stream and closes it
    /// when done.
    async fn handle(&self, stream: BoxedStream, remote: Option<SocketAddr>);
}

/// Read one `\n`-terminated line of at most `max_len` bytes (terminator excluded).
///
/// Reads byte by byte so nothing past the terminator is consumed.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if the stream ends before the
/// terminator, the line is too long, or it is not UTF-8.
pub async fn read_line<S>(stream: &mut S, max_len: usize) -> TransportResult<String>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(32);
    loop {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::Protocol(
                "stream closed before line terminator".into(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() == max_len {
            return Err(TransportError::Protocol(format!(
                "line exceeds {max_len} bytes"
            )));
        }
        line.push(byte[0]);
    }

    String::from_utf8(line).map_err(|_| TransportError::Protocol("line is not UTF-8".into()))
}

/// Write `line` followed by `\n` and flush.
///
/// # Errors
///
/// Returns [`TransportError::Io`] on write failure.
pub async fn write_line<S>(stream: &mut S, line: &str) -> TransportResult<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Dialer side of protocol negotiation: propose `protocol`, expect it echoed.
pub(crate) async fn negotiate_outbound<S>(stream: &mut S, protocol: &str) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    write_line(stream, protocol).await?;
    match read_line(stream, MAX_PROTOCOL_LEN).await {
        Ok(echo) if echo == protocol => Ok(()),
        Ok(other) => Err(TransportError::Protocol(format!(
            "negotiation echoed {other:?}, expected {protocol:?}"
        ))),
        Err(TransportError::Protocol(_)) => {
            Err(TransportError::UnsupportedProtocol(protocol.to_string()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_line_stops_at_terminator() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"42\nrest").await.unwrap();
        let line = read_line(&mut b, 32).await.unwrap();
        assert_eq!(line, "42");

        let mut rest = [0u8; 4];
        b.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"rest");
    }

    #[tokio::test]
    async fn test_read_line_eof_before_terminator() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"12").await.unwrap();
        drop(a);
        let result = read_line(&mut b, 32).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let (mut a, mut b) = duplex(128);
        a.write_all(&[b'7'; 40]).await.unwrap();
        let result = read_line(&mut b, 32).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_negotiation_rejected_when_remote_closes() {
        let (mut a, b) = duplex(128);
        drop(b);
        let result = negotiate_outbound(&mut a, "/bt/file/1.0.0").await;
        assert!(result.is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_line_roundtrip(line in "[^\n]{0,200}") {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let read = rt.block_on(async {
                let (mut a, mut b) = duplex(1024);
                write_line(&mut a, &line).await.unwrap();
                read_line(&mut b, MAX_PROTOCOL_LEN * 4).await.unwrap()
            });
            proptest::prop_assert_eq!(read, line);
        }
    }
}
