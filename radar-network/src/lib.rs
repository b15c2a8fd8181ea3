//! Bitcoin peer-to-peer networking layer
//!
//! This crate provides the connection pools the relay monitors run on:
//! peer discovery through DNS seeds, the version handshake, per-peer channels
//! that surface `inv` announcements, and an in-memory backend for tests.
//! Everything is exposed through the callback contracts in [`traits`].

pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod pool;
pub mod subscriber;
pub mod traits;
pub mod transport;

pub use bootstrap::{DnsSeeds, SeedResolver};
pub use channel::TcpChannel;
pub use config::PoolConfig;
pub use error::{NetworkError, NetworkResult, StopReason};
pub use memory::{MemoryConnection, MemoryNetwork, MemoryPool, StartOutcome};
pub use pool::{TcpConnectionPool, TcpPoolFactory};
pub use subscriber::{Handler, Subscriber};
pub use traits::{
    ConnectionId, ConnectionPool, PeerConnection, PeerConnectionRef, PoolFactory, PoolRole,
};

/// Re-export commonly used types
pub use bitcoin::Network;
