//! Error types for the chunk store

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by chunk store operations
#[derive(Debug, Error)]
pub enum FilesError {
    /// File stat/open/read/write failure
    #[error("I/O error ({context}): {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be streamed through the digest
    #[error("failed to hash {}: {source}", path.display())]
    Hash {
        /// File being hashed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl FilesError {
    /// I/O error with a short description of the operation
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for chunk store operations
pub type Result<T> = std::result::Result<T, FilesError>;
