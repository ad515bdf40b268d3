//! Parallel download scheduler.
//!
//! Two passes over a bounded job queue:
//!
//! 1. Primary: every chunk index, `min(max_workers, 2 * peers)` workers.
//! 2. Retry: the chunks that failed on every peer, `min(retry_workers, peers)`
//!    workers. There is exactly one retry pass.
//!
//! A worker takes the chunk lock, re-checks completion, then tries each peer
//! in snapshot order until one delivers. Chunks that exhaust the peer list go
//! into the session's failure set.

use crate::config::SchedulerConfig;
use crate::error::{BtError, Result};
use crate::protocol::ChunkClient;
use crate::session::DownloadSession;
use bt_transport::TransportError;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Summary of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Chunks written
    pub chunks: u64,
    /// Final file length in bytes
    pub bytes: u64,
    /// Wall-clock duration of the scheduler run
    pub elapsed: Duration,
    /// Chunks that needed the retry pass
    pub retried: u64,
}

impl DownloadReport {
    /// Average throughput in bytes per second
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Worker-pool download engine for one [`DownloadSession`]
pub struct ParallelDownloadScheduler {
    session: Arc<DownloadSession>,
    client: ChunkClient,
    config: SchedulerConfig,
}

impl ParallelDownloadScheduler {
    /// Create a scheduler
    #[must_use]
    pub fn new(session: Arc<DownloadSession>, client: ChunkClient, config: SchedulerConfig) -> Self {
        Self {
            session,
            client,
            config,
        }
    }

    /// The session being filled
    #[must_use]
    pub fn session(&self) -> &Arc<DownloadSession> {
        &self.session
    }

    /// Download every chunk.
    ///
    /// On success the output file is trimmed to its real length.
    ///
    /// # Errors
    ///
    /// - [`BtError::SessionIncomplete`] if chunks remain after the retry pass;
    ///   the partial output file stays on disk
    /// - [`BtError::Cancelled`] if `cancel` fired while chunks remained;
    ///   chunks already requested are still written
    /// - a file error if the output cannot be finalized
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DownloadReport> {
        let start = Instant::now();
        let total = self.session.total_chunks();
        let peers = self.session.peers().len();

        let workers = self.config.primary_workers(peers);
        tracing::info!(
            "Downloading {} chunks of {} from {} peers with {} workers",
            total,
            self.session.file_id(),
            peers,
            workers
        );
        self.run_pass((0..total).collect(), workers, cancel).await?;
        self.check_cancelled(cancel)?;

        let failed = self.session.take_failed();
        let retried = failed.len() as u64;
        if !failed.is_empty() {
            let workers = self.config.retry_pass_workers(peers);
            tracing::info!(
                "Retrying {} failed chunks with {} workers",
                failed.len(),
                workers
            );
            self.run_pass(failed, workers, cancel).await?;
            self.check_cancelled(cancel)?;
        }

        let failed = self.session.failed_chunks();
        if !failed.is_empty() {
            tracing::warn!("{} chunks failed after retry: {:?}", failed.len(), failed);
            return Err(BtError::SessionIncomplete { failed });
        }

        let incomplete = self.session.incomplete_chunks();
        if !incomplete.is_empty() {
            return Err(BtError::SessionIncomplete { failed: incomplete });
        }

        let bytes = self.session.finalize().await?;
        let report = DownloadReport {
            chunks: total,
            bytes,
            elapsed: start.elapsed(),
            retried,
        };
        tracing::info!(
            "Download of {} complete: {} bytes in {:?}",
            self.session.file_id(),
            report.bytes,
            report.elapsed
        );
        Ok(report)
    }

    /// Sorted snapshot of the chunks that are in the failure set
    #[must_use]
    pub fn failed_chunks(&self) -> Vec<u64> {
        self.session.failed_chunks()
    }

    /// Cancellation only ends the run while chunks remain.
    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() && !self.session.is_finished() {
            let outstanding = self.session.total_chunks() - self.session.completed_chunks();
            tracing::info!("Download cancelled, {} chunks outstanding", outstanding);
            return Err(BtError::Cancelled { outstanding });
        }
        Ok(())
    }

    async fn run_pass(
        &self,
        indices: Vec<u64>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let queue = Arc::new(ArrayQueue::new(indices.len().max(1)));
        for index in indices {
            if cancel.is_cancelled() {
                break;
            }
            // Capacity covers every index.
            let _ = queue.push(index);
        }

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let session = Arc::clone(&self.session);
            let client = self.client.clone();
            let cancel = cancel.clone();
            pool.spawn(async move {
                while !cancel.is_cancelled() {
                    let Some(index) = queue.pop() else {
                        break;
                    };
                    download_chunk(&session, &client, index, &cancel).await;
                }
            });
        }

        while let Some(joined) = pool.join_next().await {
            joined?;
        }
        Ok(())
    }
}

/// Fetch one chunk from the first peer that delivers it, or record it as failed.
///
/// A delivered chunk that cannot be written counts as a failed attempt on that
/// peer, so the index is only recorded after every peer was tried.
async fn download_chunk(
    session: &DownloadSession,
    client: &ChunkClient,
    index: u64,
    cancel: &CancellationToken,
) {
    if session.is_complete(index) {
        return;
    }

    let _guard = session.lock_chunk(index).await;
    if session.is_complete(index) {
        return;
    }

    let expected = session.expected_length(index);
    for peer in session.peers().iter() {
        if cancel.is_cancelled() {
            return;
        }

        match client.fetch(peer, index, expected, cancel).await {
            Ok(data) => {
                let len = data.len();
                match session.complete_chunk(index, data).await {
                    Ok(()) => {
                        tracing::debug!(
                            "Chunk {} ({} bytes) from {}",
                            index,
                            len,
                            peer.id.short()
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Writing chunk {} from {} failed: {}",
                            index,
                            peer.id.short(),
                            e
                        );
                    }
                }
            }
            Err(TransportError::Cancelled) => return,
            Err(e) => {
                tracing::debug!("Chunk {} from {} failed: {}", index, peer.id.short(), e);
            }
        }
    }

    let exhausted = BtError::ChunkExhausted {
        index,
        peers: session.peers().len(),
    };
    tracing::warn!("{}", exhausted);
    session.mark_failed(index);
}
