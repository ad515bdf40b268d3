//! Process-local discovery backend.

use crate::error::{DiscoveryError, Result};
use crate::service::DiscoveryService;
use async_trait::async_trait;
use bt_files::ContentId;
use bt_transport::PeerRef;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Provider table shared by every handle cloned from the same instance.
///
/// Each node gets its own handle via [`MemoryDiscovery::with_local`] so that
/// `provide` knows which peer to record.
#[derive(Clone, Default)]
pub struct MemoryDiscovery {
    records: Arc<DashMap<Vec<u8>, Vec<PeerRef>>>,
    local: Option<PeerRef>,
}

impl MemoryDiscovery {
    /// Create an empty table with no local identity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same table that provides as `local`
    #[must_use]
    pub fn with_local(&self, local: PeerRef) -> Self {
        Self {
            records: Arc::clone(&self.records),
            local: Some(local),
        }
    }

    /// Insert a provider record directly. Re-adding a peer replaces its entry.
    pub fn add_provider(&self, key: &ContentId, peer: PeerRef) {
        let mut providers = self.records.entry(key.as_bytes().to_vec()).or_default();
        providers.retain(|p| p.id != peer.id);
        providers.push(peer);
    }

    /// Number of providers recorded for `key`
    #[must_use]
    pub fn provider_count(&self, key: &ContentId) -> usize {
        self.records.get(key.as_bytes()).map_or(0, |p| p.len())
    }
}

#[async_trait]
impl DiscoveryService for MemoryDiscovery {
    async fn provide(&self, key: &ContentId) -> Result<()> {
        let local = self
            .local
            .clone()
            .ok_or_else(|| DiscoveryError::Announce("no local peer identity".into()))?;
        self.add_provider(key, local);
        Ok(())
    }

    fn find_providers_async(&self, key: &ContentId, max: usize) -> mpsc::Receiver<PeerRef> {
        let providers: Vec<PeerRef> = self
            .records
            .get(key.as_bytes())
            .map(|p| p.iter().take(max).cloned().collect())
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(providers.len().max(1));
        for peer in providers {
            // Capacity covers every record.
            let _ = tx.try_send(peer);
        }
        rx
    }
}
