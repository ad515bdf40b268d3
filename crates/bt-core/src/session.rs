//! State of one download: output file, per-chunk slots, failure set.

use crate::error::{BtError, Result};
use crate::protocol::ExpectedLength;
use bt_files::{FileId, FilesError, chunker};
use bt_transport::PeerRef;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-chunk mutual exclusion and completion flag.
///
/// `done` flips `false -> true` once, while `lock` is held.
#[derive(Debug, Default)]
pub struct ChunkSlot {
    lock: tokio::sync::Mutex<()>,
    done: AtomicBool,
}

impl ChunkSlot {
    /// Whether the chunk has been written
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// One download in progress
#[derive(Debug)]
pub struct DownloadSession {
    file_id: FileId,
    path: PathBuf,
    file: Arc<File>,
    total_chunks: u64,
    chunk_size: usize,
    peers: Arc<[PeerRef]>,
    slots: Box<[ChunkSlot]>,
    failed: Mutex<BTreeSet<u64>>,
    completed: AtomicU64,
    bytes_written: AtomicU64,
    last_chunk_len: AtomicU64,
}

impl DownloadSession {
    /// Create `path` (truncating any existing file), pre-size it to
    /// `total_chunks * chunk_size` and allocate one slot per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::InvalidConfig`] for a zero chunk size or a layout that
    /// overflows, and a file error if the output cannot be created or sized.
    pub fn create(
        path: impl AsRef<Path>,
        file_id: FileId,
        total_chunks: u64,
        chunk_size: usize,
        peers: Vec<PeerRef>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if chunk_size == 0 {
            return Err(BtError::InvalidConfig("chunk_size must be > 0".into()));
        }
        let presize = total_chunks
            .checked_mul(chunk_size as u64)
            .ok_or_else(|| BtError::InvalidConfig(format!("{total_chunks} chunks overflow")))?;
        let slot_count = usize::try_from(total_chunks)
            .map_err(|_| BtError::InvalidConfig(format!("{total_chunks} chunks too many")))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FilesError::io(format!("create {}", path.display()), e))?;
        file.set_len(presize)
            .map_err(|e| FilesError::io(format!("pre-size {}", path.display()), e))?;

        let slots = (0..slot_count).map(|_| ChunkSlot::default()).collect();

        tracing::debug!(
            "Created download session for {} ({} chunks, {} peers) at {}",
            file_id,
            total_chunks,
            peers.len(),
            path.display()
        );

        Ok(Self {
            file_id,
            path,
            file: Arc::new(file),
            total_chunks,
            chunk_size,
            peers: peers.into(),
            slots,
            failed: Mutex::new(BTreeSet::new()),
            completed: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            last_chunk_len: AtomicU64::new(0),
        })
    }

    /// Swap the output handle, keeping the layout.
    #[cfg(test)]
    pub(crate) fn with_file(mut self, file: File) -> Self {
        self.file = Arc::new(file);
        self
    }

    /// File being downloaded
    #[must_use]
    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    /// Output path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of chunks
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Peer snapshot, fixed for the session
    #[must_use]
    pub fn peers(&self) -> &Arc<[PeerRef]> {
        &self.peers
    }

    /// Slot for `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= total_chunks`.
    #[must_use]
    pub fn slot(&self, index: u64) -> &ChunkSlot {
        &self.slots[index as usize]
    }

    /// Whether chunk `index` is written
    #[must_use]
    pub fn is_complete(&self, index: u64) -> bool {
        self.slots
            .get(index as usize)
            .is_some_and(ChunkSlot::is_done)
    }

    /// Chunks written so far
    #[must_use]
    pub fn completed_chunks(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Bytes written so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Whether every chunk is written
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed_chunks() == self.total_chunks
    }

    /// Indices not yet written, ascending
    #[must_use]
    pub fn incomplete_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|&i| !self.is_complete(i))
            .collect()
    }

    /// Acceptable response length for `index`
    #[must_use]
    pub fn expected_length(&self, index: u64) -> ExpectedLength {
        if index + 1 == self.total_chunks {
            ExpectedLength::UpTo(self.chunk_size)
        } else {
            ExpectedLength::Exact(self.chunk_size)
        }
    }

    /// Add `index` to the failure set
    pub fn mark_failed(&self, index: u64) {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index);
    }

    /// Drain the failure set, ascending
    pub fn take_failed(&self) -> Vec<u64> {
        let mut failed = self.failed.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *failed).into_iter().collect()
    }

    /// Snapshot of the failure set, ascending
    #[must_use]
    pub fn failed_chunks(&self) -> Vec<u64> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Write chunk `index` at its offset and mark it complete.
    ///
    /// Callers must hold the slot lock for `index`.
    pub(crate) async fn complete_chunk(&self, index: u64, data: Vec<u8>) -> Result<()> {
        let len = data.len() as u64;
        let file = Arc::clone(&self.file);
        let chunk_size = self.chunk_size;
        tokio::task::spawn_blocking(move || chunker::write_chunk(&file, index, chunk_size, &data))
            .await??;

        if index + 1 == self.total_chunks {
            self.last_chunk_len.store(len, Ordering::Relaxed);
        }
        self.slot(index).done.store(true, Ordering::Release);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Acquire the slot lock for `index`
    pub(crate) async fn lock_chunk(&self, index: u64) -> tokio::sync::MutexGuard<'_, ()> {
        self.slot(index).lock.lock().await
    }

    /// Trim the pre-sized output to the real file length and flush it.
    ///
    /// Only valid once every chunk is written.
    ///
    /// # Errors
    ///
    /// Returns a file error if the file cannot be resized or synced.
    pub async fn finalize(&self) -> Result<u64> {
        let len = match self.total_chunks {
            0 => 0,
            n => (n - 1) * self.chunk_size as u64 + self.last_chunk_len.load(Ordering::Relaxed),
        };
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> bt_files::Result<()> {
            file.set_len(len)
                .map_err(|e| FilesError::io(format!("trim {}", path.display()), e))?;
            file.sync_all()
                .map_err(|e| FilesError::io(format!("sync {}", path.display()), e))
        })
        .await??;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_transport::PeerId;

    fn file_id() -> FileId {
        FileId::parse("00112233aabbccdd").unwrap()
    }

    #[test]
    fn test_create_presizes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let session = DownloadSession::create(&path, file_id(), 3, 1024, Vec::new()).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * 1024);
        assert_eq!(session.incomplete_chunks(), vec![0, 1, 2]);
        assert!(!session.is_finished());
    }

    #[test]
    fn test_create_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        let result = DownloadSession::create(&path, file_id(), 1, 1024, Vec::new());
        assert!(matches!(result, Err(BtError::Files(FilesError::Io { .. }))));
    }

    #[test]
    fn test_expected_length_last_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let session = DownloadSession::create(
            dir.path().join("out.bin"),
            file_id(),
            3,
            1024,
            vec![PeerRef::new(PeerId::random(), Vec::new())],
        )
        .unwrap();

        assert_eq!(session.expected_length(0), ExpectedLength::Exact(1024));
        assert_eq!(session.expected_length(1), ExpectedLength::Exact(1024));
        assert_eq!(session.expected_length(2), ExpectedLength::UpTo(1024));
        assert_eq!(session.peers().len(), 1);
    }

    #[test]
    fn test_failure_set_drain() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            DownloadSession::create(dir.path().join("out.bin"), file_id(), 8, 16, Vec::new())
                .unwrap();

        session.mark_failed(5);
        session.mark_failed(2);
        session.mark_failed(5);
        assert_eq!(session.failed_chunks(), vec![2, 5]);
        assert_eq!(session.take_failed(), vec![2, 5]);
        assert!(session.failed_chunks().is_empty());
    }

    #[tokio::test]
    async fn test_complete_and_finalize_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let session = DownloadSession::create(&path, file_id(), 2, 8, Vec::new()).unwrap();

        for (index, data) in [(1u64, vec![2u8; 3]), (0, vec![1u8; 8])] {
            let _guard = session.lock_chunk(index).await;
            session.complete_chunk(index, data).await.unwrap();
        }
        assert!(session.is_finished());
        assert_eq!(session.bytes_written(), 11);

        assert_eq!(session.finalize().await.unwrap(), 11);
        let mut expected = vec![1u8; 8];
        expected.extend_from_slice(&[2u8; 3]);
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let session = DownloadSession::create(&path, file_id(), 0, 1024, Vec::new()).unwrap();
        assert!(session.is_finished());
        assert_eq!(session.finalize().await.unwrap(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
