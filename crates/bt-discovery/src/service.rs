//! The discovery capability consumed by seeding and downloading sessions.

use crate::error::Result;
use async_trait::async_trait;
use bt_files::ContentId;
use bt_transport::PeerRef;
use tokio::sync::mpsc;

/// Lookup service mapping content IDs to the peers that provide them
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Register the local node as a provider of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DiscoveryError::Announce`] if no backend accepted the record.
    async fn provide(&self, key: &ContentId) -> Result<()>;

    /// Start a provider search for `key`, yielding at most `max` peers.
    ///
    /// The channel closes when the backend has exhausted its search. A backend
    /// may also never close it; callers bound the search with their own deadline.
    fn find_providers_async(&self, key: &ContentId, max: usize) -> mpsc::Receiver<PeerRef>;
}
