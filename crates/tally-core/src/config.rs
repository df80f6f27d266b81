//! Configuration management for Tally
//!
//! Both binaries start from these defaults, overlay an optional TOML file
//! and then apply environment/flag overrides parsed by the binary itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, TallyError};

/// Collector server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_server_address")]
    pub address: String,

    /// RPC listen address, the RPC service only runs when this is set
    #[serde(default)]
    pub grpc_address: Option<String>,

    /// Snapshot flush interval in seconds, 0 flushes on every write
    #[serde(default = "default_store_interval", rename = "store_interval")]
    pub store_interval_secs: u64,

    /// Snapshot file for the file-backed store
    #[serde(default)]
    pub file_storage_path: Option<PathBuf>,

    /// Seed the store from the snapshot at startup
    #[serde(default)]
    pub restore: bool,

    /// Relational database location, takes precedence over the snapshot file
    #[serde(default)]
    pub database_dsn: Option<String>,

    /// Shared HMAC-SHA256 key
    #[serde(default)]
    pub key: Option<String>,

    /// Path to the RSA private key PEM
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,

    /// Trusted subnet in CIDR notation
    #[serde(default)]
    pub trusted_subnet: Option<String>,

    /// Upper bound on draining in-flight requests after a shutdown signal
    #[serde(default = "default_shutdown_grace", rename = "shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Collector HTTP address
    #[serde(default = "default_agent_address")]
    pub address: String,

    /// Collector RPC address
    #[serde(default = "default_agent_grpc_address")]
    pub grpc_address: String,

    #[serde(default = "default_poll_interval", rename = "poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_report_interval", rename = "report_interval")]
    pub report_interval_secs: u64,

    /// Shared HMAC-SHA256 key
    #[serde(default)]
    pub key: Option<String>,

    /// Concurrent outbound requests, also the queue capacity
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    /// Path to the RSA public key PEM
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,

    #[serde(default)]
    pub protocol: Transport,

    /// Origin address sent in `X-Real-IP`, discovered when unset
    #[serde(default)]
    pub real_ip: Option<String>,
}

/// Agent transport selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Grpc,
}

impl FromStr for Transport {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Transport::Http),
            "grpc" => Ok(Transport::Grpc),
            other => Err(TallyError::Config(format!("unknown protocol: {}", other))),
        }
    }
}

// Default value providers
fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_agent_address() -> String {
    "localhost:8080".to_string()
}

fn default_agent_grpc_address() -> String {
    "localhost:9090".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        TallyError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn blank_to_none<T: AsRef<std::ffi::OsStr>>(value: &mut Option<T>) {
    if value.as_ref().is_some_and(|v| v.as_ref().is_empty()) {
        *value = None;
    }
}

impl ServerConfig {
    /// Load from an optional TOML file, falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_toml(path)?,
            None => Self::default(),
        };
        config.normalize();
        Ok(config)
    }

    /// Treat empty optional settings as unset
    pub fn normalize(&mut self) {
        blank_to_none(&mut self.grpc_address);
        blank_to_none(&mut self.file_storage_path);
        blank_to_none(&mut self.database_dsn);
        blank_to_none(&mut self.key);
        blank_to_none(&mut self.crypto_key);
        blank_to_none(&mut self.trusted_subnet);
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl AgentConfig {
    /// Load from an optional TOML file, falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_toml(path)?,
            None => Self::default(),
        };
        config.normalize();
        Ok(config)
    }

    /// Treat empty optional settings as unset and clamp the rate limit
    pub fn normalize(&mut self) {
        blank_to_none(&mut self.key);
        blank_to_none(&mut self.crypto_key);
        blank_to_none(&mut self.real_ip);
        self.rate_limit = self.rate_limit.max(1);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            grpc_address: None,
            store_interval_secs: default_store_interval(),
            file_storage_path: None,
            restore: false,
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_agent_address(),
            grpc_address: default_agent_grpc_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            key: None,
            rate_limit: default_rate_limit(),
            crypto_key: None,
            protocol: Transport::Http,
            real_ip: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.address, "0.0.0.0:8080");
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert!(!config.restore);
        assert!(config.grpc_address.is_none());
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_server_file_overlay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
address = "127.0.0.1:9000"
store_interval = 0
restore = true
file_storage_path = "/tmp/metrics.json"
key = ""
trusted_subnet = "10.0.0.0/8"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.address, "127.0.0.1:9000");
        assert_eq!(config.store_interval_secs, 0);
        assert!(config.restore);
        assert_eq!(config.file_storage_path, Some(PathBuf::from("/tmp/metrics.json")));
        assert!(config.key.is_none());
        assert_eq!(config.trusted_subnet.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_agent_file_overlay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.toml");
        std::fs::write(
            &path,
            r#"
protocol = "grpc"
rate_limit = 0
poll_interval = 1
"#,
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.protocol, Transport::Grpc);
        assert_eq!(config.rate_limit, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.address, "localhost:8080");
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.toml");
        std::fs::write(&path, "rate_limit = \"many\"").unwrap();
        assert!(matches!(AgentConfig::load(Some(&path)), Err(TallyError::Config(_))));
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!("GRPC".parse::<Transport>().unwrap(), Transport::Grpc);
        assert!("udp".parse::<Transport>().is_err());
    }
}
