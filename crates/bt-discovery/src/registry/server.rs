//! UDP provider registry node.

use super::messages::{MAX_DATAGRAM_SIZE, RegistryMessage};
use super::store::ProviderStore;
use crate::error::Result;
use bt_transport::PeerRef;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Addresses kept per announced peer
const MAX_ADDRS_PER_PEER: usize = 8;

/// Upper bound on providers returned per query
const MAX_PROVIDERS_PER_REPLY: usize = 64;

/// Registry node configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// UDP address to listen on
    pub bind_addr: SocketAddr,
    /// How long a provider record lives without a refresh
    pub record_ttl: Duration,
    /// How often expired records are dropped
    pub prune_interval: Duration,
    /// Records kept per content ID
    pub max_providers_per_key: usize,
    /// Content IDs tracked at once
    pub max_keys: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4100)),
            record_ttl: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(60),
            max_providers_per_key: 256,
            max_keys: 65_536,
        }
    }
}

/// Rendezvous node that stores provider records and answers lookups
pub struct RegistryServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
    store: Mutex<ProviderStore>,
    prune_interval: Duration,
}

impl RegistryServer {
    /// Bind the registry socket.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be bound.
    pub async fn bind(config: RegistryConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            store: Mutex::new(ProviderStore::new(
                config.record_ttl,
                config.max_providers_per_key,
                config.max_keys,
            )),
            prune_interval: config.prune_interval,
        })
    }

    /// Address the registry is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live provider records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_count()
    }

    /// Serve requests until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut prune = tokio::time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Provider registry listening on {}", self.local_addr);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = prune.tick() => {
                    let removed = self
                        .store
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .prune_expired();
                    if removed > 0 {
                        tracing::debug!("Pruned {} expired provider records", removed);
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!("Registry receive failed: {}", e);
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }

        tracing::info!("Provider registry on {} stopped", self.local_addr);
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let request = match RegistryMessage::from_bytes(bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Dropping malformed datagram from {}: {}", from, e);
                return;
            }
        };

        let Some(reply) = self.handle_message(request, from) else {
            return;
        };

        match reply.to_bytes() {
            Ok(out) => {
                if let Err(e) = self.socket.send_to(&out, from).await {
                    tracing::debug!("Reply to {} failed: {}", from, e);
                }
            }
            Err(e) => tracing::warn!("Could not encode reply to {}: {}", from, e),
        }
    }

    /// Apply one request and build the reply, if any.
    pub(crate) fn handle_message(
        &self,
        message: RegistryMessage,
        from: SocketAddr,
    ) -> Option<RegistryMessage> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        match message {
            RegistryMessage::AddProvider {
                request_id,
                key,
                peer,
            } => {
                let peer = observed_peer(peer, from);
                tracing::debug!("Provider {} registered from {}", peer, from);
                store.add(key, peer);
                Some(RegistryMessage::ProviderAck {
                    request_id,
                    ttl_secs: store.ttl().as_secs(),
                })
            }
            RegistryMessage::GetProviders {
                request_id,
                key,
                max,
            } => {
                let max = usize::try_from(max)
                    .unwrap_or(MAX_PROVIDERS_PER_REPLY)
                    .min(MAX_PROVIDERS_PER_REPLY);
                let peers = store.get(&key, max);
                tracing::trace!("Lookup from {} answered with {} providers", from, peers.len());
                Some(RegistryMessage::Providers { request_id, peers })
            }
            RegistryMessage::ProviderAck { .. } | RegistryMessage::Providers { .. } => None,
        }
    }
}

/// Replace unspecified IPs with the address the announcement came from.
fn observed_peer(mut peer: PeerRef, from: SocketAddr) -> PeerRef {
    peer.addrs.truncate(MAX_ADDRS_PER_PEER);
    for addr in &mut peer.addrs {
        if addr.ip().is_unspecified() {
            addr.set_ip(from.ip());
        }
    }
    peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_transport::PeerId;

    async fn server() -> RegistryServer {
        RegistryServer::bind(RegistryConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..RegistryConfig::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let server = server().await;
        let from: SocketAddr = "192.0.2.7:5000".parse().unwrap();
        let peer = PeerRef::new(PeerId::random(), vec!["192.0.2.7:4001".parse().unwrap()]);

        let ack = server.handle_message(
            RegistryMessage::AddProvider {
                request_id: 1,
                key: b"cid".to_vec(),
                peer: peer.clone(),
            },
            from,
        );
        assert_eq!(
            ack,
            Some(RegistryMessage::ProviderAck {
                request_id: 1,
                ttl_secs: 3600
            })
        );

        let reply = server.handle_message(
            RegistryMessage::GetProviders {
                request_id: 2,
                key: b"cid".to_vec(),
                max: 10,
            },
            from,
        );
        assert_eq!(
            reply,
            Some(RegistryMessage::Providers {
                request_id: 2,
                peers: vec![peer],
            })
        );
    }

    #[tokio::test]
    async fn test_unspecified_address_rewritten() {
        let server = server().await;
        let from: SocketAddr = "198.51.100.9:6000".parse().unwrap();
        let peer = PeerRef::new(
            PeerId::random(),
            vec![
                "0.0.0.0:4001".parse().unwrap(),
                "203.0.113.1:4002".parse().unwrap(),
            ],
        );

        server.handle_message(
            RegistryMessage::AddProvider {
                request_id: 1,
                key: b"cid".to_vec(),
                peer,
            },
            from,
        );
        let Some(RegistryMessage::Providers { peers, .. }) = server.handle_message(
            RegistryMessage::GetProviders {
                request_id: 2,
                key: b"cid".to_vec(),
                max: 10,
            },
            from,
        ) else {
            panic!("expected providers");
        };

        assert_eq!(
            peers[0].addrs,
            vec![
                "198.51.100.9:4001".parse::<SocketAddr>().unwrap(),
                "203.0.113.1:4002".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_replies_are_not_answered() {
        let server = server().await;
        let reply = server.handle_message(
            RegistryMessage::Providers {
                request_id: 1,
                peers: Vec::new(),
            },
            "127.0.0.1:1".parse().unwrap(),
        );
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_records_expire() {
        let server = RegistryServer::bind(RegistryConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            record_ttl: Duration::from_millis(10),
            ..RegistryConfig::default()
        })
        .await
        .unwrap();
        let from: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        server.handle_message(
            RegistryMessage::AddProvider {
                request_id: 1,
                key: b"cid".to_vec(),
                peer: PeerRef::new(PeerId::random(), Vec::new()),
            },
            from,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reply = server.handle_message(
            RegistryMessage::GetProviders {
                request_id: 2,
                key: b"cid".to_vec(),
                max: 10,
            },
            from,
        );
        assert_eq!(
            reply,
            Some(RegistryMessage::Providers {
                request_id: 2,
                peers: Vec::new()
            })
        );
    }
}
