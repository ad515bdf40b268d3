//! Timeouts, worker counts and node settings.

use crate::error::{BtError, Result};
use bt_discovery::DiscoveryClientConfig;
use bt_files::CHUNK_SIZE;
use std::time::Duration;

/// Per-exchange deadlines for the chunk protocol
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Opening a stream to a peer
    pub connect_timeout: Duration,
    /// Writing the request (client) or response (server)
    pub write_timeout: Duration,
    /// Reading the response (client) or request line (server)
    pub read_timeout: Duration,
    /// Whole exchange
    pub stream_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(30),
        }
    }
}

impl TransferConfig {
    /// Reject zero sizes and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BtError::InvalidConfig("chunk_size must be > 0".into()));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("write_timeout", self.write_timeout),
            ("read_timeout", self.read_timeout),
            ("stream_timeout", self.stream_timeout),
        ] {
            if value.is_zero() {
                return Err(BtError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Worker pool sizing
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on primary pass workers
    pub max_workers: usize,
    /// Upper bound on retry pass workers
    pub retry_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            retry_workers: 3,
        }
    }
}

impl SchedulerConfig {
    /// Primary pass: `min(max_workers, 2 * peers)`, at least 1
    #[must_use]
    pub fn primary_workers(&self, peers: usize) -> usize {
        self.max_workers.min(peers.saturating_mul(2)).max(1)
    }

    /// Retry pass: `min(retry_workers, peers)`, at least 1
    #[must_use]
    pub fn retry_pass_workers(&self, peers: usize) -> usize {
        self.retry_workers.min(peers).max(1)
    }

    /// Reject zero worker bounds.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(BtError::InvalidConfig("max_workers must be > 0".into()));
        }
        if self.retry_workers == 0 {
            return Err(BtError::InvalidConfig("retry_workers must be > 0".into()));
        }
        Ok(())
    }
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Chunk protocol deadlines
    pub transfer: TransferConfig,
    /// Download worker pool
    pub scheduler: SchedulerConfig,
    /// Provider search
    pub discovery: DiscoveryClientConfig,
    /// How often a seeder re-announces its file
    pub reprovide_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            scheduler: SchedulerConfig::default(),
            discovery: DiscoveryClientConfig::default(),
            reprovide_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl NodeConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::InvalidConfig`] for the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.transfer.validate()?;
        self.scheduler.validate()?;
        if self.discovery.provider_timeout.is_zero() {
            return Err(BtError::InvalidConfig("provider_timeout must be > 0".into()));
        }
        if self.discovery.max_providers == 0 {
            return Err(BtError::InvalidConfig("max_providers must be > 0".into()));
        }
        if self.reprovide_interval.is_zero() {
            return Err(BtError::InvalidConfig("reprovide_interval must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_counts() {
        let config = SchedulerConfig::default();
        assert_eq!(config.primary_workers(0), 1);
        assert_eq!(config.primary_workers(1), 2);
        assert_eq!(config.primary_workers(3), 6);
        assert_eq!(config.primary_workers(50), 10);

        assert_eq!(config.retry_pass_workers(0), 1);
        assert_eq!(config.retry_pass_workers(2), 2);
        assert_eq!(config.retry_pass_workers(8), 3);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = NodeConfig::default();
        config.transfer.read_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(BtError::InvalidConfig(_))));

        let mut config = NodeConfig::default();
        config.scheduler.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.discovery.max_providers = 0;
        assert!(config.validate().is_err());
    }
}
