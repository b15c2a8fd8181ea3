//! Peer discovery through DNS seeds and fixed peers

use crate::config::PoolConfig;
use crate::error::{NetworkError, NetworkResult};
use bitcoin::Network;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Well-known DNS seeds per network
pub struct DnsSeeds;

impl DnsSeeds {
    pub fn mainnet() -> Vec<&'static str> {
        vec![
            "seed.bitcoin.sipa.be",
            "dnsseed.bluematt.me",
            "dnsseed.bitcoin.dashjr.org",
            "seed.bitcoinstats.com",
            "seed.bitcoin.jonasschnelli.ch",
            "seed.btc.petertodd.org",
            "seed.bitcoin.sprovoost.nl",
            "dnsseed.emzy.de",
            "seed.bitcoin.wiz.biz",
        ]
    }

    pub fn testnet() -> Vec<&'static str> {
        vec![
            "testnet-seed.bitcoin.jonasschnelli.ch",
            "seed.tbtc.petertodd.org",
            "seed.testnet.bitcoin.sprovoost.nl",
            "testnet-seed.bluematt.me",
        ]
    }

    pub fn signet() -> Vec<&'static str> {
        vec!["seed.signet.bitcoin.sprovoost.nl"]
    }

    /// Seeds for a network. Regtest has none.
    pub fn for_network(network: Network) -> Vec<&'static str> {
        match network {
            Network::Bitcoin => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Signet => Self::signet(),
            _ => Vec::new(),
        }
    }
}

/// Resolves the candidate addresses a pool dials
#[derive(Debug, Clone)]
pub struct SeedResolver {
    seeds: Vec<String>,
    peers: Vec<String>,
    port: u16,
    lookup_timeout: Duration,
}

impl SeedResolver {
    pub fn from_config(config: &PoolConfig) -> Self {
        let seeds = if config.dns_seeds.is_empty() && config.peers.is_empty() {
            DnsSeeds::for_network(config.network)
                .into_iter()
                .map(String::from)
                .collect()
        } else {
            config.dns_seeds.clone()
        };

        Self {
            seeds,
            peers: config.peers.clone(),
            port: config.p2p_port(),
            lookup_timeout: config.seed_timeout(),
        }
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Look up every seed and fixed peer. The result is deduplicated and
    /// shuffled. Individual lookup failures are logged and skipped; an empty
    /// overall result is an error.
    pub async fn resolve(&self) -> NetworkResult<Vec<SocketAddr>> {
        let mut found = BTreeSet::new();

        for peer in &self.peers {
            match self.lookup(peer.clone()).await {
                Ok(addresses) => found.extend(addresses),
                Err(e) => warn!(peer = %peer, "Peer lookup failed: {}", e),
            }
        }

        for seed in &self.seeds {
            match self.lookup(format!("{}:{}", seed, self.port)).await {
                Ok(addresses) => {
                    debug!(seed = %seed, count = addresses.len(), "Resolved DNS seed");
                    found.extend(addresses);
                }
                Err(e) => warn!(seed = %seed, "DNS seed lookup failed: {}", e),
            }
        }

        if found.is_empty() {
            return Err(NetworkError::Bootstrap(
                "no peer addresses could be resolved".to_string(),
            ));
        }

        let mut addresses: Vec<SocketAddr> = found.into_iter().collect();
        addresses.shuffle(&mut rand::rng());
        Ok(addresses)
    }

    async fn lookup(&self, target: String) -> NetworkResult<Vec<SocketAddr>> {
        let addresses = timeout(self.lookup_timeout, lookup_host(target))
            .await
            .map_err(|_| NetworkError::Timeout)??;
        Ok(addresses.collect())
    }
}
