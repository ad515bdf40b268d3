//! # bt-files
//!
//! Chunk store for bt-p2p.
//!
//! This crate provides:
//! - Deterministic mapping between a file and a sequence of fixed-size chunks
//! - Positional chunk reads and writes on a shared file handle
//! - SHA-256 chunk and whole-file hashing
//! - Content addressing: file identifiers and discovery-service content IDs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addressing;
pub mod chunker;
pub mod error;

pub use addressing::{ContentId, FileId, ParseFileIdError, discovery_key};
pub use error::{FilesError, Result};

use std::path::{Path, PathBuf};

/// Chunk size used on the wire and on disk (512 KiB).
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Metadata describing a file that is about to be seeded.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Path of the seeded file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the entire file
    pub hash: [u8; 32],
    /// Public file identifier derived from `hash`
    pub file_id: FileId,
    /// Number of chunks
    pub chunk_count: u64,
    /// Chunk size the layout was computed with
    pub chunk_size: usize,
}

impl FileMetadata {
    /// Stat and hash a file, deriving its identifier and chunk layout.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Io`] if the file cannot be inspected and
    /// [`FilesError::Hash`] if it cannot be streamed through the digest.
    pub fn from_path<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)
            .map_err(|e| FilesError::io(format!("stat {}", path.display()), e))?
            .len();

        tracing::debug!(
            "Hashing {} ({} bytes, chunk_size={})",
            path.display(),
            size,
            chunk_size
        );
        let hash = chunker::file_hash(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            size,
            hash,
            file_id: FileId::from_digest(&hash),
            chunk_count: chunker::chunk_count_for_size(size, chunk_size),
            chunk_size,
        })
    }

    /// Length of the chunk at `index`, or `None` if the index is past the end.
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> Option<usize> {
        let offset = chunker::chunk_offset(index, self.chunk_size);
        if offset >= self.size {
            return None;
        }
        Some((self.size - offset).min(self.chunk_size as u64) as usize)
    }
}
