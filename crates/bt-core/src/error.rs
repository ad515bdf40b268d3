//! Error types for seeding and downloading

use bt_discovery::DiscoveryError;
use bt_files::FilesError;
use bt_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by bt-core operations
#[derive(Debug, Error)]
pub enum BtError {
    /// Chunk store failure
    #[error("File error: {0}")]
    Files(#[from] FilesError),

    /// Connection service failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Discovery failure
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Every peer in the snapshot failed for one chunk
    #[error("Chunk {index} could not be fetched from any of {peers} peers")]
    ChunkExhausted {
        /// Chunk index
        index: u64,
        /// Peers tried
        peers: usize,
    },

    /// Chunks still missing after the retry pass
    #[error("Download incomplete: {} chunks failed: {failed:?}", failed.len())]
    SessionIncomplete {
        /// Unresolved chunk indices, ascending
        failed: Vec<u64>,
    },

    /// The session was cancelled
    #[error("Download cancelled with {outstanding} chunks outstanding")]
    Cancelled {
        /// Chunks not yet written
        outstanding: u64,
    },

    /// Invalid configuration or arguments
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker task panicked or was aborted
    #[error("Task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type for bt-core operations
pub type Result<T> = std::result::Result<T, BtError>;
