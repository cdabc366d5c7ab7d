//! TOML-based configuration for the node.
//!
//! The file lives at the platform-appropriate location:
//! - Windows:  `%APPDATA%\TTC\config.toml`
//! - Linux:    `~/.config/ttc/config.toml`
//! - macOS:    `~/Library/Application Support/TTC/config.toml`
//!
//! or wherever `--config` points.  A missing file is not an error: the node
//! runs on defaults, which suit a layout where every node is on the same LAN.
//!
//! # Example
//!
//! ```toml
//! [node]
//! log_level = "debug"
//!
//! [network]
//! port = 11111
//! relay_echo = false
//!
//! [discovery]
//! timeout_ms = 8000
//! mdns = false
//! static_peers = ["192.168.1.20:11111"]
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, and every section is
//! optional, so a partial file only overrides what it names.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ttc_core::domain::descriptor::{DEFAULT_PORT, DEFAULT_SERVICE_TYPE};
use ttc_core::protocol::queue::DEFAULT_QUEUE_CAPACITY;

use crate::infrastructure::network::client::ClientConfig;
use crate::infrastructure::network::server::ServerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Transport settings shared by both roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Port the server role listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Outbound payloads buffered per connection before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Whether the server writes a relayed payload back to its sender.
    #[serde(default = "default_true")]
    pub relay_echo: bool,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Discovery and role-selection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Base time to search as a client before becoming the server.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Apply ±25% jitter to `timeout_ms`.
    #[serde(default = "default_true")]
    pub randomize_timeout: bool,
    /// Allow this node to become the server.
    #[serde(default = "default_true")]
    pub server_enabled: bool,
    /// Use multicast DNS for browsing and advertising.
    #[serde(default = "default_true")]
    pub mdns: bool,
    /// Peers tried in addition to (or instead of) mDNS results.
    #[serde(default)]
    pub static_peers: Vec<SocketAddr>,
    #[serde(default = "default_reannounce_interval_ms")]
    pub reannounce_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_true() -> bool {
    true
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_reannounce_interval_ms() -> u64 {
    2_000
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            port: default_port(),
            bind_address: default_bind_address(),
            queue_capacity: default_queue_capacity(),
            relay_echo: default_true(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            randomize_timeout: default_true(),
            server_enabled: default_true(),
            mdns: default_true(),
            static_peers: Vec::new(),
            reannounce_interval_ms: default_reannounce_interval_ms(),
        }
    }
}

// ── Role settings ─────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Client role settings derived from this config.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            service_type: self.network.service_type.clone(),
            queue_capacity: self.network.queue_capacity,
        }
    }

    /// Server role settings derived from this config; `host` names the
    /// advertised instance.
    pub fn server_config(&self, host: &str) -> ServerConfig {
        ServerConfig {
            service_type: self.network.service_type.clone(),
            host: host.to_string(),
            bind_address: self.network.bind_address,
            port: self.network.port,
            queue_capacity: self.network.queue_capacity,
            relay_echo: self.network.relay_echo,
            shutdown_grace: Duration::from_millis(self.network.shutdown_grace_ms),
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.timeout_ms)
    }

    pub fn reannounce_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.reannounce_interval_ms)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from [`config_file_path`] when `None`.
///
/// A missing file yields [`NodeConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path` (or the default location), creating the
/// directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &NodeConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TTC"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("ttc"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("TTC"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_values() {
        // Arrange / Act
        let cfg = NodeConfig::default();

        // Assert
        assert_eq!(cfg.network.port, 11111);
        assert_eq!(cfg.network.service_type, "_ttc._tcp.local.");
        assert_eq!(cfg.network.queue_capacity, 256);
        assert!(cfg.network.relay_echo);
        assert_eq!(cfg.discovery_timeout(), Duration::from_secs(10));
        assert!(cfg.discovery.randomize_timeout);
        assert!(cfg.discovery.server_enabled);
        assert!(cfg.discovery.static_peers.is_empty());
        assert_eq!(cfg.node.log_level, "info");
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: NodeConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_named_fields() {
        // Arrange
        let toml_str = r#"
[network]
relay_echo = false

[discovery]
static_peers = ["192.168.1.20:11111"]
"#;

        // Act
        let cfg: NodeConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert!(!cfg.network.relay_echo);
        assert_eq!(cfg.network.port, 11111);
        assert_eq!(
            cfg.discovery.static_peers,
            vec!["192.168.1.20:11111".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        // Arrange
        let mut cfg = NodeConfig::default();
        cfg.network.port = 12000;
        cfg.discovery.mdns = false;
        cfg.discovery.static_peers.push("10.0.0.2:12000".parse().unwrap());

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: NodeConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<NodeConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_server_config_carries_network_section() {
        // Arrange
        let mut cfg = NodeConfig::default();
        cfg.network.relay_echo = false;
        cfg.network.shutdown_grace_ms = 750;

        // Act
        let server = cfg.server_config("yard-pi");

        // Assert
        assert_eq!(server.host, "yard-pi");
        assert_eq!(server.port, 11111);
        assert!(!server.relay_echo);
        assert_eq!(server.shutdown_grace, Duration::from_millis(750));
    }

    #[test]
    fn test_load_and_save_round_trip_on_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("ttc-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut cfg = NodeConfig::default();
        cfg.node.log_level = "debug".to_string();

        // Act
        save_config(&cfg, Some(&path)).expect("save");
        let loaded = load_config(Some(&path)).expect("load");
        let _ = std::fs::remove_dir_all(&dir);

        // Assert
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!("ttc-missing-{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(load_config(Some(&path)).expect("load"), NodeConfig::default());
    }
}
