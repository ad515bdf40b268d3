//! Provider registry: a small UDP rendezvous service.
//!
//! Seeders send `AddProvider` to every configured registry; leechers send
//! `GetProviders` to all of them and merge the answers. Records expire unless
//! refreshed by a re-announce.

mod messages;
mod server;
mod store;

pub use messages::{MAX_DATAGRAM_SIZE, MessageError, RegistryMessage};
pub use server::{RegistryConfig, RegistryServer};
pub use store::{ProviderRecord, ProviderStore};

use crate::error::{DiscoveryError, Result};
use crate::service::DiscoveryService;
use async_trait::async_trait;
use bt_files::ContentId;
use bt_transport::{PeerId, PeerRef};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Discovery backend talking to one or more registry nodes
#[derive(Debug, Clone)]
pub struct RegistryDiscovery {
    registries: Vec<SocketAddr>,
    local: PeerRef,
    request_timeout: Duration,
    attempts: u32,
}

impl RegistryDiscovery {
    /// Create a backend that announces `local` to `registries`
    #[must_use]
    pub fn new(registries: Vec<SocketAddr>, local: PeerRef, request_timeout: Duration) -> Self {
        Self {
            registries,
            local,
            request_timeout,
            attempts: 2,
        }
    }

    /// Configured registry addresses
    #[must_use]
    pub fn registries(&self) -> &[SocketAddr] {
        &self.registries
    }
}

#[async_trait]
impl DiscoveryService for RegistryDiscovery {
    async fn provide(&self, key: &ContentId) -> Result<()> {
        if self.registries.is_empty() {
            return Err(DiscoveryError::Announce("no registries configured".into()));
        }

        let mut requests = JoinSet::new();
        for &registry in &self.registries {
            let message = RegistryMessage::AddProvider {
                request_id: rand::random(),
                key: key.as_bytes().to_vec(),
                peer: self.local.clone(),
            };
            let (timeout, attempts) = (self.request_timeout, self.attempts);
            requests.spawn(async move { request(registry, message, timeout, attempts).await });
        }

        let mut acked = 0usize;
        let mut errors = Vec::new();
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok(Ok(RegistryMessage::ProviderAck { ttl_secs, .. })) => {
                    acked += 1;
                    tracing::debug!("Registry acknowledged provider record (ttl {}s)", ttl_secs);
                }
                Ok(Ok(other)) => errors.push(format!("unexpected reply {other:?}")),
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if acked == 0 {
            return Err(DiscoveryError::Announce(errors.join("; ")));
        }
        for e in &errors {
            tracing::warn!("Registry announce partially failed: {}", e);
        }
        Ok(())
    }

    fn find_providers_async(&self, key: &ContentId, max: usize) -> mpsc::Receiver<PeerRef> {
        let (tx, rx) = mpsc::channel(max.max(1));
        let registries = self.registries.clone();
        let key = key.as_bytes().to_vec();
        let (timeout, attempts) = (self.request_timeout, self.attempts);
        let wanted = u32::try_from(max).unwrap_or(u32::MAX);

        tokio::spawn(async move {
            let mut requests = JoinSet::new();
            for registry in registries {
                let message = RegistryMessage::GetProviders {
                    request_id: rand::random(),
                    key: key.clone(),
                    max: wanted,
                };
                requests.spawn(async move {
                    (registry, request(registry, message, timeout, attempts).await)
                });
            }

            let mut seen: HashSet<PeerId> = HashSet::new();
            while let Some(joined) = requests.join_next().await {
                let peers = match joined {
                    Ok((_, Ok(RegistryMessage::Providers { peers, .. }))) => peers,
                    Ok((registry, Ok(_))) => {
                        tracing::debug!("Registry {} sent an unexpected reply", registry);
                        continue;
                    }
                    Ok((registry, Err(e))) => {
                        tracing::debug!("Registry {} lookup failed: {}", registry, e);
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!("Registry lookup task failed: {}", e);
                        continue;
                    }
                };

                for peer in peers {
                    if seen.len() >= max {
                        return;
                    }
                    if seen.insert(peer.id) && tx.send(peer).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }
}

/// Send `message` to `registry` and wait for the reply with the same request ID.
async fn request(
    registry: SocketAddr,
    message: RegistryMessage,
    timeout: Duration,
    attempts: u32,
) -> Result<RegistryMessage> {
    let bind: SocketAddr = if registry.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    let bytes = message.to_bytes()?;
    let request_id = message.request_id();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    for attempt in 1..=attempts.max(1) {
        socket.send_to(&bytes, registry).await?;

        let reply = tokio::time::timeout(timeout, async {
            loop {
                let (len, from) = socket.recv_from(&mut buf).await?;
                if from != registry {
                    continue;
                }
                match RegistryMessage::from_bytes(&buf[..len]) {
                    Ok(reply) if reply.request_id() == request_id => {
                        return Ok::<_, DiscoveryError>(reply);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::trace!("Ignoring malformed reply from {}: {}", from, e),
                }
            }
        })
        .await;

        match reply {
            Ok(result) => return result,
            Err(_) => tracing::debug!(
                "Registry {} did not answer (attempt {}/{})",
                registry,
                attempt,
                attempts
            ),
        }
    }

    Err(DiscoveryError::Registry(registry, "no reply".into()))
}
