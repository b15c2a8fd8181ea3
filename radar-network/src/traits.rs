//! Contracts between the relay layer and a peer-to-peer backend

use crate::subscriber::Handler;
use radar_core::{InventoryMessage, Transaction};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// A live link to one remote node
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Human readable remote address
    fn remote(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Deliver the next inventory announcement to `handler`, exactly once.
    ///
    /// Fails with [`NetworkError::ChannelStopped`](crate::NetworkError::ChannelStopped)
    /// once the link is gone.
    fn subscribe_next_inventory(&self, handler: Handler<InventoryMessage>);
}

pub type PeerConnectionRef = Arc<dyn PeerConnection>;

/// A managed set of outbound connections
pub trait ConnectionPool: Send + Sync {
    /// Target number of outbound connections the pool maintains
    fn set_max_outbound(&self, count: usize);

    fn max_outbound(&self) -> usize;

    /// Begin operating. `on_ready` fires exactly once with the startup outcome.
    fn start(&self, on_ready: Handler<()>);

    /// Deliver the next newly established connection, or the error that
    /// prevented one, to `handler`.
    fn subscribe_next_connection(&self, handler: Handler<PeerConnectionRef>);

    /// Send a transaction to the currently live connections. `on_sent` fires
    /// exactly once.
    fn broadcast(&self, transaction: Transaction, on_sent: Handler<()>);

    fn live_connection_count(&self) -> usize;

    /// Shut down. Pending and later subscriptions fail with
    /// [`NetworkError::ServiceStopped`](crate::NetworkError::ServiceStopped).
    fn stop(&self);
}

/// What a pool is used for inside a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Broadcast,
    Monitor,
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolRole::Broadcast => f.write_str("broadcast"),
            PoolRole::Monitor => f.write_str("monitor"),
        }
    }
}

/// Creates pools bound to a monitor's worker runtime
pub trait PoolFactory: Send + Sync {
    fn create_pool(&self, role: PoolRole, runtime: &Handle) -> Arc<dyn ConnectionPool>;
}
