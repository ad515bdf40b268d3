//! Provider records with expiry.

use bt_transport::{PeerId, PeerRef};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A provider entry with expiration tracking
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    /// The providing peer
    pub peer: PeerRef,
    /// When the record was (last) stored
    pub stored_at: Instant,
    /// Time-to-live
    pub ttl: Duration,
}

impl ProviderRecord {
    /// Create a record stored now
    #[must_use]
    pub fn new(peer: PeerRef, ttl: Duration) -> Self {
        Self {
            peer,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Check if the record has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }

    /// Remaining time-to-live
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.stored_at.elapsed())
    }
}

/// Provider records keyed by binary content ID
#[derive(Debug)]
pub struct ProviderStore {
    records: HashMap<Vec<u8>, HashMap<PeerId, ProviderRecord>>,
    ttl: Duration,
    max_per_key: usize,
    max_keys: usize,
}

impl ProviderStore {
    /// Create an empty store
    #[must_use]
    pub fn new(ttl: Duration, max_per_key: usize, max_keys: usize) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
            max_per_key: max_per_key.max(1),
            max_keys: max_keys.max(1),
        }
    }

    /// Record TTL
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add or refresh `peer` as a provider of `key`.
    ///
    /// When the key is full, the oldest record is evicted. When the store
    /// holds `max_keys` keys, a new key first prunes expired records and then
    /// evicts the key with the stalest newest record.
    pub fn add(&mut self, key: Vec<u8>, peer: PeerRef) {
        if !self.records.contains_key(&key) && self.records.len() >= self.max_keys {
            self.prune_expired();
            if self.records.len() >= self.max_keys {
                self.evict_stalest_key();
            }
        }

        let providers = self.records.entry(key).or_default();

        if !providers.contains_key(&peer.id) && providers.len() >= self.max_per_key {
            let oldest = providers
                .iter()
                .min_by_key(|(_, r)| r.stored_at)
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                providers.remove(&id);
            }
        }

        providers.insert(peer.id, ProviderRecord::new(peer, self.ttl));
    }

    /// Live providers of `key`, most recent first
    #[must_use]
    pub fn get(&self, key: &[u8], max: usize) -> Vec<PeerRef> {
        let Some(providers) = self.records.get(key) else {
            return Vec::new();
        };

        let mut live: Vec<&ProviderRecord> =
            providers.values().filter(|r| !r.is_expired()).collect();
        live.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        live.into_iter().take(max).map(|r| r.peer.clone()).collect()
    }

    fn evict_stalest_key(&mut self) {
        let stalest = self
            .records
            .iter()
            .min_by_key(|(_, providers)| providers.values().map(|r| r.stored_at).max())
            .map(|(key, _)| key.clone());
        if let Some(key) = stalest {
            self.records.remove(&key);
        }
    }

    /// Remove expired records, returning how many were dropped
    pub fn prune_expired(&mut self) -> usize {
        let mut removed = 0;
        self.records.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|_, r| !r.is_expired());
            removed += before - providers.len();
            !providers.is_empty()
        });
        removed
    }

    /// Number of keys with at least one record
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Total number of records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.values().map(HashMap::len).sum()
    }
}
