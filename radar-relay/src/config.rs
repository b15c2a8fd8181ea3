//! Relay configuration

use crate::error::{RelayError, RelayResult};
use crate::logging::LogConfig;
use config::{Config, Environment, File};
use radar_network::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the environment variables that override file settings
pub const ENV_PREFIX: &str = "TXRADAR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Worker threads driving network I/O and callbacks
    pub threads: usize,

    /// Outbound connections kept by the broadcast pool
    pub broadcast_hosts: usize,

    /// Outbound connections kept by the monitor pool
    pub monitor_hosts: usize,

    pub pool: PoolConfig,

    pub log: LogConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            broadcast_hosts: 8,
            monitor_hosts: 8,
            pool: PoolConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional TOML file, then `TXRADAR__*` environment variables.
    ///
    /// Nested keys use `__`, e.g. `TXRADAR__POOL__NETWORK=testnet`.
    pub fn load(path: Option<&Path>) -> RelayResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let relay: Self = config.try_deserialize()?;
        relay.validate()?;
        Ok(relay)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_hosts(mut self, broadcast_hosts: usize, monitor_hosts: usize) -> Self {
        self.broadcast_hosts = broadcast_hosts;
        self.monitor_hosts = monitor_hosts;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> RelayResult<()> {
        if self.threads == 0 {
            return Err(RelayError::Config(
                "Worker thread count must be greater than 0".to_string(),
            ));
        }

        if self.broadcast_hosts == 0 || self.monitor_hosts == 0 {
            return Err(RelayError::Config(
                "Host counts must be greater than 0".to_string(),
            ));
        }

        self.pool.validate().map_err(RelayError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_network::Network;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_config_validation() {
        let config = RelayConfig::new().with_threads(0);
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = RelayConfig::new().with_hosts(0, 8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
threads = 2
monitor_hosts = 3

[pool]
network = "testnet"
peers = ["127.0.0.1:18333"]

[log]
silent = true
"#
        )
        .unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.monitor_hosts, 3);
        assert_eq!(config.broadcast_hosts, 8);
        assert_eq!(config.pool.network, Network::Testnet);
        assert_eq!(config.pool.peers, vec!["127.0.0.1:18333".to_string()]);
        assert!(config.log.silent);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "threads = 0").unwrap();
        assert!(matches!(
            RelayConfig::load(Some(file.path())),
            Err(RelayError::Config(_))
        ));
    }
}
