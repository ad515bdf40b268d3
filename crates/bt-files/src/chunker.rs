//! Fixed-size chunking with positional reads and writes.
//!
//! A file of `size` bytes maps to `ceil(size / chunk_size)` chunks. Chunk `i`
//! starts at `i * chunk_size`; every chunk is `chunk_size` bytes long except the
//! last, which holds the remainder.
//!
//! Reads and writes are positional (`pread`/`pwrite` on Unix, `seek_read` /
//! `seek_write` on Windows) so a single [`File`] can be shared across workers
//! writing distinct chunks without coordinating on a cursor.

use crate::error::{FilesError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Read buffer used when streaming a whole file through the digest.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk index
    pub index: u64,
    /// Byte offset in file
    pub offset: u64,
    /// Chunk length in bytes
    pub length: usize,
    /// SHA-256 of the chunk bytes
    pub hash: [u8; 32],
}

/// Byte offset of chunk `index`.
#[must_use]
pub fn chunk_offset(index: u64, chunk_size: usize) -> u64 {
    index * chunk_size as u64
}

/// Number of chunks a file of `size` bytes splits into.
#[must_use]
pub fn chunk_count_for_size(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}

/// Number of chunks the file at `path` splits into.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the file cannot be stat'ed.
pub fn chunk_count<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<u64> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)
        .map_err(|e| FilesError::io(format!("stat {}", path.display()), e))?
        .len();
    Ok(chunk_count_for_size(size, chunk_size))
}

/// Read chunk `index` from `file`.
///
/// Returns exactly the bytes available at the chunk's offset, up to
/// `chunk_size`. The result is shorter than `chunk_size` only for the final
/// chunk, and empty when the offset lies at or past the end of the file.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the underlying read fails.
pub fn read_chunk(file: &File, index: u64, chunk_size: usize) -> Result<Vec<u8>> {
    let offset = chunk_offset(index, chunk_size);
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;

    while filled < chunk_size {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FilesError::io(format!("read chunk {index}"), e)),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Write `data` as chunk `index` of `file`.
///
/// Safe to call concurrently for distinct indices on the same handle.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the underlying write fails.
pub fn write_chunk(file: &File, index: u64, chunk_size: usize, data: &[u8]) -> Result<()> {
    let offset = chunk_offset(index, chunk_size);
    write_all_at(file, data, offset)
        .map_err(|e| FilesError::io(format!("write chunk {index}"), e))
}

/// SHA-256 of a chunk.
#[must_use]
pub fn chunk_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of the whole file at `path`.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the file cannot be opened and
/// [`FilesError::Hash`] if reading it fails midway.
pub fn file_hash<P: AsRef<Path>>(path: P) -> Result<[u8; 32]> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| FilesError::io(format!("open {} for hashing", path.display()), e))?;

    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|source| FilesError::Hash {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(hasher.finalize().into())
}

/// Read and hash chunk `index` of `file`.
///
/// # Errors
///
/// Returns an `InvalidInput` I/O error if the index is past the end of the
/// file, or any error from [`read_chunk`].
pub fn chunk_info(file: &File, index: u64, chunk_size: usize) -> Result<ChunkInfo> {
    let size = file
        .metadata()
        .map_err(|e| FilesError::io("stat chunk source", e))?
        .len();
    let offset = chunk_offset(index, chunk_size);

    if offset >= size {
        return Err(FilesError::io(
            format!("chunk {index}"),
            io::Error::new(io::ErrorKind::InvalidInput, "Chunk index out of bounds"),
        ));
    }

    let data = read_chunk(file, index, chunk_size)?;
    Ok(ChunkInfo {
        index,
        offset,
        length: data.len(),
        hash: chunk_hash(&data),
    })
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !data.is_empty() {
        match file.seek_write(data, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
