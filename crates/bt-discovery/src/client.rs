//! File-level discovery: announce a file, find who seeds it.

use crate::error::{DiscoveryError, Result};
use crate::service::DiscoveryService;
use bt_files::{ContentId, FileId, discovery_key};
use bt_transport::{PeerId, PeerRef};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Provider search configuration
#[derive(Debug, Clone)]
pub struct DiscoveryClientConfig {
    /// Hard deadline for one provider search
    pub provider_timeout: Duration,
    /// Maximum number of providers collected per search
    pub max_providers: usize,
}

impl Default for DiscoveryClientConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            max_providers: 10,
        }
    }
}

/// Announces files and searches for their providers over a [`DiscoveryService`]
#[derive(Clone)]
pub struct DiscoveryClient {
    service: Arc<dyn DiscoveryService>,
    config: DiscoveryClientConfig,
}

impl DiscoveryClient {
    /// Create a client over `service`
    #[must_use]
    pub fn new(service: Arc<dyn DiscoveryService>, config: DiscoveryClientConfig) -> Self {
        Self { service, config }
    }

    /// Search configuration
    #[must_use]
    pub fn config(&self) -> &DiscoveryClientConfig {
        &self.config
    }

    /// Advertise the local node as a provider of `file_id`.
    ///
    /// Returns the content ID that was announced.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Announce`] if the service rejects the record.
    pub async fn announce(&self, file_id: &FileId) -> Result<ContentId> {
        let key = discovery_key(file_id);
        let cid = ContentId::for_key(&key);

        self.service.provide(&cid).await.map_err(|e| match e {
            DiscoveryError::Announce(_) => e,
            other => DiscoveryError::Announce(other.to_string()),
        })?;

        tracing::info!("Announced file {} (key {}, CID {})", file_id, key, cid);
        Ok(cid)
    }

    /// Collect providers of `file_id` until the search completes or the
    /// deadline elapses, whichever comes first.
    ///
    /// Providers are de-duplicated by peer ID. The result may be a partial set
    /// if the deadline fired after some providers arrived.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::ProviderNotFound`] if the search completed empty
    /// - [`DiscoveryError::ProviderTimeout`] if the deadline fired first with nothing found
    /// - [`DiscoveryError::Cancelled`] if `cancel` fired
    pub async fn find_providers(
        &self,
        file_id: &FileId,
        cancel: &CancellationToken,
    ) -> Result<Vec<PeerRef>> {
        let key = discovery_key(file_id);
        let cid = ContentId::for_key(&key);
        let max = self.config.max_providers.max(1);
        tracing::info!("Searching for providers of {} (CID {})", key, cid);

        let mut rx = self.service.find_providers_async(&cid, max);
        let deadline = tokio::time::sleep(self.config.provider_timeout);
        tokio::pin!(deadline);

        let mut seen: HashSet<PeerId> = HashSet::new();
        let mut providers = Vec::new();

        let timed_out = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                () = &mut deadline => break true,
                next = rx.recv() => match next {
                    Some(peer) => {
                        if !seen.insert(peer.id) {
                            continue;
                        }
                        tracing::info!("Found provider: {}", peer);
                        providers.push(peer);
                        if providers.len() >= max {
                            break false;
                        }
                    }
                    None => break false,
                },
            }
        };

        if providers.is_empty() {
            return Err(if timed_out {
                DiscoveryError::ProviderTimeout(self.config.provider_timeout, file_id.to_string())
            } else {
                DiscoveryError::ProviderNotFound(file_id.to_string())
            });
        }

        if timed_out {
            tracing::debug!(
                "Provider search for {} hit its deadline with {} providers",
                file_id,
                providers.len()
            );
        }

        Ok(providers)
    }
}
