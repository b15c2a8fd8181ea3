//! Connection pool configuration

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Bitcoin network to join
    pub network: Network,

    /// DNS seeds to query; empty means the built-in seeds for `network`
    pub dns_seeds: Vec<String>,

    /// Fixed peers as `host:port`, dialed alongside seed results
    pub peers: Vec<String>,

    /// P2P port used for seed results; `None` means the network default
    pub port: Option<u16>,

    /// Default outbound connection target, overridden by the monitors
    pub max_outbound: usize,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Version/verack exchange timeout in seconds
    pub handshake_timeout_secs: u64,

    /// DNS lookup timeout per seed in seconds
    pub seed_timeout_secs: u64,

    /// Delay between outbound maintenance rounds in milliseconds
    pub maintenance_interval_ms: u64,

    /// User agent advertised in the version message
    pub user_agent: String,

    /// Events kept per source while no subscription is pending
    pub backlog_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            dns_seeds: Vec::new(),
            peers: Vec::new(),
            port: None,
            max_outbound: 8,
            connect_timeout_secs: 5,
            handshake_timeout_secs: 10,
            seed_timeout_secs: 10,
            maintenance_interval_ms: 500,
            user_agent: format!("/txradar:{}/", env!("CARGO_PKG_VERSION")),
            backlog_capacity: 1024,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Bitcoin network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Replace the DNS seeds
    pub fn with_dns_seeds(mut self, seeds: Vec<String>) -> Self {
        self.dns_seeds = seeds;
        self
    }

    /// Replace the fixed peers
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    /// Set the default outbound target
    pub fn with_max_outbound(mut self, max_outbound: usize) -> Self {
        self.max_outbound = max_outbound;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Port used for addresses returned by seeds
    pub fn p2p_port(&self) -> u16 {
        self.port.unwrap_or(match self.network {
            Network::Bitcoin => 8333,
            Network::Signet => 38333,
            Network::Regtest => 18444,
            _ => 18333,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn seed_timeout(&self) -> Duration {
        Duration::from_secs(self.seed_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_secs == 0 || self.handshake_timeout_secs == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }

        if self.maintenance_interval_ms == 0 {
            return Err("Maintenance interval must be greater than 0".to_string());
        }

        if self.backlog_capacity == 0 {
            return Err("Backlog capacity must be greater than 0".to_string());
        }

        if self.user_agent.is_empty() {
            return Err("User agent must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.p2p_port(), 8333);
        assert!(config.user_agent.starts_with("/txradar:"));
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_network(Network::Regtest)
            .with_peers(vec!["127.0.0.1:18444".to_string()])
            .with_max_outbound(3);

        assert_eq!(config.p2p_port(), 18444);
        assert_eq!(config.max_outbound, 3);
        assert_eq!(config.peers.len(), 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PoolConfig::default();
        config.backlog_capacity = 0;
        assert!(config.validate().is_err());

        config.backlog_capacity = 16;
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "network": "testnet", "max_outbound": 2 }"#).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.max_outbound, 2);
        assert_eq!(config.p2p_port(), 18333);
        assert_eq!(config.backlog_capacity, 1024);
    }
}
