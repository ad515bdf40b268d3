//! Seeding and downloading sessions.

use crate::config::NodeConfig;
use crate::error::{BtError, Result};
use crate::protocol::{ChunkClient, ChunkServer};
use crate::scheduler::{DownloadReport, ParallelDownloadScheduler};
use crate::session::DownloadSession;
use bt_discovery::{DiscoveryClient, DiscoveryService};
use bt_files::{FileId, FileMetadata};
use bt_transport::Connector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A file prepared for seeding
pub struct SeedSession {
    /// Layout and identifiers of the seeded file
    pub metadata: FileMetadata,
    /// Handler to register for [`crate::PROTOCOL_ID`] on the connection service
    pub server: Arc<ChunkServer>,
}

/// A bt-p2p node
///
/// Holds the connection and discovery services and runs seeding or
/// downloading sessions over them.
#[derive(Clone)]
pub struct Node {
    connector: Arc<dyn Connector>,
    discovery: DiscoveryClient,
    config: NodeConfig,
}

impl Node {
    /// Create a node.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn DiscoveryService>,
        config: NodeConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            discovery: DiscoveryClient::new(discovery, config.discovery.clone()),
            config,
        })
    }

    /// Node configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Hash `path` and build the chunk server for it.
    ///
    /// # Errors
    ///
    /// Returns a file error if the file cannot be read or hashed.
    pub async fn seed(&self, path: impl AsRef<Path>) -> Result<SeedSession> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let chunk_size = self.config.transfer.chunk_size;
        let metadata =
            tokio::task::spawn_blocking(move || FileMetadata::from_path(&path, chunk_size))
                .await??;

        tracing::info!(
            "Seeding {} as {} ({} bytes, {} chunks)",
            metadata.path.display(),
            metadata.file_id,
            metadata.size,
            metadata.chunk_count
        );

        let server = Arc::new(ChunkServer::new(
            metadata.path.clone(),
            self.config.transfer.clone(),
        ));
        Ok(SeedSession { metadata, server })
    }

    /// Announce `file_id` once. Failure is logged, not returned.
    pub async fn announce(&self, file_id: &FileId) -> bool {
        match self.discovery.announce(file_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Announce of {} failed, continuing to seed: {}", file_id, e);
                false
            }
        }
    }

    /// Announce `file_id` now and then every `reprovide_interval` until `cancel` fires.
    pub async fn provide_until_cancelled(&self, file_id: &FileId, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reprovide_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.announce(file_id).await;
                }
            }
        }
        tracing::debug!("Stopped announcing {}", file_id);
    }

    /// Find providers of `file_id` and download its `chunk_count` chunks into `output`.
    ///
    /// `output` is created only after at least one provider is found.
    ///
    /// # Errors
    ///
    /// - discovery errors (`ProviderNotFound`, `ProviderTimeout`, cancellation)
    /// - a file error if `output` cannot be created or pre-sized
    /// - [`BtError::SessionIncomplete`] or [`BtError::Cancelled`] from the scheduler
    pub async fn download(
        &self,
        file_id: &FileId,
        chunk_count: u64,
        output: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let session = self
            .prepare_download(file_id, chunk_count, output, cancel)
            .await?;
        self.scheduler(session).run(cancel).await
    }

    /// Resolve providers and create the session without starting the transfer.
    ///
    /// Lets callers observe session progress while the scheduler runs.
    ///
    /// # Errors
    ///
    /// Same as [`Node::download`] up to session creation.
    pub async fn prepare_download(
        &self,
        file_id: &FileId,
        chunk_count: u64,
        output: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<Arc<DownloadSession>> {
        let providers = match self.discovery.find_providers(file_id, cancel).await {
            Ok(p) => p,
            Err(bt_discovery::DiscoveryError::Cancelled) => {
                return Err(BtError::Cancelled {
                    outstanding: chunk_count,
                });
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Found {} providers for {}", providers.len(), file_id);

        let output = output.as_ref().to_path_buf();
        let file_id = file_id.clone();
        let chunk_size = self.config.transfer.chunk_size;
        let session = tokio::task::spawn_blocking(move || {
            DownloadSession::create(&output, file_id, chunk_count, chunk_size, providers)
        })
        .await??;

        Ok(Arc::new(session))
    }

    /// Scheduler for a prepared session
    #[must_use]
    pub fn scheduler(&self, session: Arc<DownloadSession>) -> ParallelDownloadScheduler {
        let client = ChunkClient::new(Arc::clone(&self.connector), self.config.transfer.clone());
        ParallelDownloadScheduler::new(session, client, self.config.scheduler.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::protocol::PROTOCOL_ID;
    use bt_discovery::{DiscoveryClientConfig, DiscoveryError, MemoryDiscovery};
    use bt_transport::{MemoryConnector, PeerId, PeerRef};
    use std::io::Write;
    use std::time::Duration;

    const CHUNK: usize = 4096;

    fn config() -> NodeConfig {
        NodeConfig {
            transfer: TransferConfig {
                chunk_size: CHUNK,
                ..TransferConfig::default()
            },
            discovery: DiscoveryClientConfig {
                provider_timeout: Duration::from_secs(2),
                max_providers: 10,
            },
            ..NodeConfig::default()
        }
    }

    fn write_source(dir: &Path, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = dir.join("source.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn test_seed_then_download_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let (source, data) = write_source(dir.path(), CHUNK * 3 + 100);

        let connector = MemoryConnector::new();
        let table = MemoryDiscovery::new();

        let seeder_id = PeerId::random();
        let seeder = Node::new(
            Arc::new(connector.clone()),
            Arc::new(table.with_local(PeerRef::new(seeder_id, Vec::new()))),
            config(),
        )
        .unwrap();
        let seeded = seeder.seed(&source).await.unwrap();
        connector.register(seeder_id, PROTOCOL_ID, seeded.server.clone());
        assert!(seeder.announce(&seeded.metadata.file_id).await);

        let leecher = Node::new(Arc::new(connector.clone()), Arc::new(table.clone()), config())
            .unwrap();
        let output = dir.path().join("out.bin");
        let report = leecher
            .download(
                &seeded.metadata.file_id,
                seeded.metadata.chunk_count,
                &output,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.chunks, 4);
        assert_eq!(std::fs::read(&output).unwrap(), data);
        assert_eq!(seeded.server.served(), 4);
    }

    #[tokio::test]
    async fn test_download_without_providers_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(
            Arc::new(MemoryConnector::new()),
            Arc::new(MemoryDiscovery::new()),
            config(),
        )
        .unwrap();
        let output = dir.path().join("never.bin");

        let result = node
            .download(
                &FileId::parse("ffffffffffffffff").unwrap(),
                3,
                &output,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(BtError::Discovery(DiscoveryError::ProviderNotFound(_)))
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_announce_failure_is_not_fatal() {
        let node = Node::new(
            Arc::new(MemoryConnector::new()),
            Arc::new(MemoryDiscovery::new()),
            config(),
        )
        .unwrap();
        assert!(!node.announce(&FileId::parse("0000000000000001").unwrap()).await);
    }

    #[tokio::test]
    async fn test_provide_loop_stops_on_cancel() {
        let table = MemoryDiscovery::new();
        let node = Node::new(
            Arc::new(MemoryConnector::new()),
            Arc::new(table.with_local(PeerRef::new(PeerId::random(), Vec::new()))),
            config(),
        )
        .unwrap();
        let file_id = FileId::parse("0000000000000002").unwrap();
        let cancel = CancellationToken::new();

        let task = {
            let node = node.clone();
            let file_id = file_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { node.provide_until_cancelled(&file_id, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            table.provider_count(&bt_files::ContentId::for_file(&file_id)),
            1
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.scheduler.retry_workers = 0;
        let result = Node::new(
            Arc::new(MemoryConnector::new()),
            Arc::new(MemoryDiscovery::new()),
            bad,
        );
        assert!(matches!(result, Err(BtError::InvalidConfig(_))));
    }
}
