//! Configuration file for the `bt` binary.
//!
//! Loaded from TOML; every field has a default so a missing or partial file
//! is valid.

use anyhow::{Context, bail};
use bt_core::{NodeConfig, SchedulerConfig, TransferConfig};
use bt_discovery::{DiscoveryClientConfig, RegistryConfig};
use bt_files::CHUNK_SIZE;
use bt_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and advertised addresses
    pub network: NetworkConfig,
    /// Provider registry settings
    pub discovery: DiscoverySettings,
    /// Chunk protocol and download settings
    pub transfer: TransferSettings,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address the seeder listens on
    pub listen_addr: SocketAddr,
    /// Addresses announced to registries; empty announces the listen address
    pub advertise_addrs: Vec<SocketAddr>,
    /// Per-address connect deadline (seconds)
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            advertise_addrs: Vec::new(),
            connect_timeout_secs: 10,
        }
    }
}

/// Discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Registry nodes to announce to and query
    pub registries: Vec<SocketAddr>,
    /// Bind address for `bt registry`
    pub registry_bind: SocketAddr,
    /// Provider search deadline (seconds)
    pub provider_timeout_secs: u64,
    /// Providers collected per search
    pub max_providers: usize,
    /// Per-registry request deadline (milliseconds)
    pub request_timeout_ms: u64,
    /// Seeder re-announce interval (seconds)
    pub reprovide_interval_secs: u64,
    /// Provider record lifetime on a registry (seconds)
    pub record_ttl_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            registries: vec![SocketAddr::from(([127, 0, 0, 1], 4100))],
            registry_bind: SocketAddr::from(([0, 0, 0, 0], 4100)),
            provider_timeout_secs: 30,
            max_providers: 10,
            request_timeout_ms: 2000,
            reprovide_interval_secs: 30 * 60,
            record_ttl_secs: 60 * 60,
        }
    }
}

/// Transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Request/response write deadline (seconds)
    pub write_timeout_secs: u64,
    /// Response read deadline (seconds)
    pub read_timeout_secs: u64,
    /// Whole-exchange deadline (seconds)
    pub stream_timeout_secs: u64,
    /// Primary pass worker bound
    pub max_workers: usize,
    /// Retry pass worker bound
    pub retry_workers: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            write_timeout_secs: 10,
            read_timeout_secs: 30,
            stream_timeout_secs: 30,
            max_workers: 10,
            retry_workers: 3,
        }
    }
}

impl Config {
    /// Default config path (`~/.config/bt/config.toml`)
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".config")
            .join("bt")
            .join("config.toml")
    }

    /// Load configuration from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from the default path, or use defaults if it does not exist.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Reject zero timeouts and worker counts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.connect_timeout_secs == 0 {
            bail!("network.connect_timeout_secs must be > 0");
        }
        if self.discovery.request_timeout_ms == 0 {
            bail!("discovery.request_timeout_ms must be > 0");
        }
        if self.discovery.record_ttl_secs == 0 {
            bail!("discovery.record_ttl_secs must be > 0");
        }
        self.node_config().validate()?;
        Ok(())
    }

    /// Connection service settings
    pub fn transport_config(&self) -> TransportConfig {
        let connect = Duration::from_secs(self.network.connect_timeout_secs);
        TransportConfig {
            connect_timeout: connect,
            negotiate_timeout: connect,
        }
    }

    /// Node settings
    pub fn node_config(&self) -> NodeConfig {
        let t = &self.transfer;
        NodeConfig {
            transfer: TransferConfig {
                chunk_size: CHUNK_SIZE,
                connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
                write_timeout: Duration::from_secs(t.write_timeout_secs),
                read_timeout: Duration::from_secs(t.read_timeout_secs),
                stream_timeout: Duration::from_secs(t.stream_timeout_secs),
            },
            scheduler: SchedulerConfig {
                max_workers: t.max_workers,
                retry_workers: t.retry_workers,
            },
            discovery: DiscoveryClientConfig {
                provider_timeout: Duration::from_secs(self.discovery.provider_timeout_secs),
                max_providers: self.discovery.max_providers,
            },
            reprovide_interval: Duration::from_secs(self.discovery.reprovide_interval_secs),
        }
    }

    /// Registry node settings, with an optional bind override
    pub fn registry_config(&self, bind: Option<SocketAddr>) -> RegistryConfig {
        RegistryConfig {
            bind_addr: bind.unwrap_or(self.discovery.registry_bind),
            record_ttl: Duration::from_secs(self.discovery.record_ttl_secs),
            ..RegistryConfig::default()
        }
    }

    /// Per-registry request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.request_timeout_ms)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            registries = ["10.0.0.5:4100"]

            [transfer]
            max_workers = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.registries.len(), 1);
        assert_eq!(config.discovery.provider_timeout_secs, 30);
        assert_eq!(config.transfer.max_workers, 4);
        assert_eq!(config.transfer.retry_workers, 3);
        assert_eq!(config.network.listen_addr.port(), 4001);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.transfer.retry_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.discovery.max_providers = 3;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.discovery.max_providers, 3);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_node_config_mapping() {
        let node = Config::default().node_config();
        assert_eq!(node.transfer.chunk_size, CHUNK_SIZE);
        assert_eq!(node.transfer.read_timeout, Duration::from_secs(30));
        assert_eq!(node.scheduler.max_workers, 10);
        assert_eq!(node.discovery.max_providers, 10);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/bt.toml"), PathBuf::from("/etc/bt.toml"));
        assert!(expand_tilde("~/x.toml").ends_with("x.toml"));
    }
}
