//! Configuration module
//!
//! Handles loading agent configuration from TOML files. Bus settings can be
//! overridden from the command line or the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::transport::connection_url;
use crate::workload::store::ComposeStore;

/// Main configuration structure for the Update Agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Agent identity and reporting
    #[serde(default)]
    pub agent: AgentConfig,

    /// Managed workload
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Message bus connection settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent identity and reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Node name, used to label bus connections. Unique across the fleet.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// RPC endpoint (request list) name. Unique across the fleet.
    #[serde(default = "default_rpc_name")]
    pub rpc_name: String,

    /// Channel version announcements are published on
    #[serde(default = "default_version_channel")]
    pub version_channel: String,

    /// Re-announce interval in seconds (0 = only at startup and after updates)
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Maximum number of RPC calls waiting behind the one in flight
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Managed workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Directory holding the compose file
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Compose file name; probed from the usual names when unset
    #[serde(default)]
    pub compose_file: Option<String>,
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redis host (required, usually from REDIS_HOST)
    #[serde(default)]
    pub host: Option<String>,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis logical database index
    #[serde(default)]
    pub db: i64,

    /// Reconnect interval in milliseconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Compose CLI invocation, e.g. ["docker", "compose"]
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,

    /// Docker socket path used for status checks (default socket when unset)
    #[serde(default)]
    pub docker_socket: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn hostname_or_unknown() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_node_name() -> String {
    format!("docker_rpc_server_{}", hostname_or_unknown())
}

fn default_rpc_name() -> String {
    format!("docker_compose_service_{}", hostname_or_unknown())
}

fn default_version_channel() -> String {
    "version_channel".to_string()
}

fn default_announce_interval() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    16
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    6379
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_compose_command() -> Vec<String> {
    vec!["docker-compose".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            rpc_name: default_rpc_name(),
            version_channel: default_version_channel(),
            announce_interval_secs: default_announce_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            compose_file: None,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            db: 0,
            reconnect_interval_ms: default_reconnect_interval(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            compose_command: default_compose_command(),
            docker_socket: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AgentConfig {
    pub fn announce_interval(&self) -> Option<Duration> {
        (self.announce_interval_secs > 0).then(|| Duration::from_secs(self.announce_interval_secs))
    }
}

impl WorkloadConfig {
    /// Compose store for this workload
    pub fn store(&self) -> ComposeStore {
        match &self.compose_file {
            Some(name) => ComposeStore::with_file_name(name.clone()),
            None => ComposeStore::new(),
        }
    }
}

impl BusConfig {
    /// Apply command line / environment overrides
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>, db: Option<i64>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.host = Some(host);
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(db) = db {
            self.db = db;
        }
    }

    /// `redis://` URL, if a host is configured
    pub fn url(&self) -> Option<String> {
        self.host
            .as_deref()
            .map(|host| connection_url(host, self.port, self.db))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.agent.rpc_name.starts_with("docker_compose_service_"));
        assert_eq!(config.agent.version_channel, "version_channel");
        assert_eq!(config.agent.announce_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.workload.directory, PathBuf::from("."));
        assert_eq!(config.bus.port, 6379);
        assert_eq!(config.bus.db, 0);
        assert!(config.bus.url().is_none());
        assert_eq!(config.runtime.compose_command, vec!["docker-compose"]);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
            [agent]
            node_name = "docker_rpc_server_machine1"
            rpc_name = "docker_compose_service_machine1"
            announce_interval_secs = 0

            [workload]
            directory = "/srv/app1"
            compose_file = "stack.yml"

            [bus]
            host = "10.0.0.5"
            db = 2

            [runtime]
            compose_command = ["docker", "compose"]
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.agent.rpc_name, "docker_compose_service_machine1");
        assert_eq!(config.agent.announce_interval(), None);
        assert_eq!(config.agent.queue_capacity, 16);
        assert_eq!(config.workload.directory, PathBuf::from("/srv/app1"));
        assert_eq!(config.bus.url().as_deref(), Some("redis://10.0.0.5:6379/2"));
        assert_eq!(config.runtime.compose_command, vec!["docker", "compose"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bus_overrides() {
        let mut bus = BusConfig::default();
        bus.apply_overrides(Some("redis.internal".to_string()), Some(6380), None);
        assert_eq!(bus.url().as_deref(), Some("redis://redis.internal:6380/0"));

        bus.apply_overrides(Some("  ".to_string()), None, Some(4));
        assert_eq!(bus.host.as_deref(), Some("redis.internal"));
        assert_eq!(bus.db, 4);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.bus.port, 6379);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[bus\nhost = ").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }
}
