//! In-process pool backend
//!
//! [`MemoryNetwork`] implements [`PoolFactory`] without sockets. Tests use it to
//! script pool startup, inject connections and announce inventory, then observe
//! what the relay layer did.

use crate::error::{NetworkError, StopReason};
use crate::subscriber::{Handler, Subscriber};
use crate::traits::{
    ConnectionId, ConnectionPool, PeerConnection, PeerConnectionRef, PoolFactory, PoolRole,
};
use parking_lot::Mutex;
use radar_core::{InventoryMessage, Transaction};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

const BACKLOG: usize = 1024;

/// Scripted result of one `start` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Ready,
    Fail(String),
}

/// Factory that hands out [`MemoryPool`]s and remembers them by role
#[derive(Default, Clone)]
pub struct MemoryNetwork {
    pools: Arc<Mutex<HashMap<PoolRole, Arc<MemoryPool>>>>,
    scripts: Arc<Mutex<HashMap<PoolRole, VecDeque<StartOutcome>>>>,
    ids: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for successive `start` calls on the pool created for `role`.
    /// Once the script runs out every start succeeds.
    pub fn script_start(&self, role: PoolRole, outcomes: Vec<StartOutcome>) {
        self.scripts
            .lock()
            .entry(role)
            .or_default()
            .extend(outcomes);
    }

    /// The most recently created pool for `role`
    pub fn pool(&self, role: PoolRole) -> Option<Arc<MemoryPool>> {
        self.pools.lock().get(&role).cloned()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }
}

impl PoolFactory for MemoryNetwork {
    fn create_pool(&self, role: PoolRole, runtime: &Handle) -> Arc<dyn ConnectionPool> {
        let script = self.scripts.lock().remove(&role).unwrap_or_default();
        let pool = MemoryPool::new(role, runtime.clone(), script, Arc::clone(&self.ids));
        self.pools.lock().insert(role, Arc::clone(&pool));
        pool
    }
}

/// A pool whose connections are created on demand by the caller
pub struct MemoryPool {
    role: PoolRole,
    runtime: Handle,
    this: Weak<MemoryPool>,
    ids: Arc<AtomicU64>,
    max_outbound: AtomicUsize,
    script: Mutex<VecDeque<StartOutcome>>,
    start_calls: AtomicUsize,
    connections: Subscriber<PeerConnectionRef>,
    live: Mutex<HashMap<ConnectionId, Arc<MemoryConnection>>>,
    broadcasts: Mutex<Vec<Transaction>>,
    stopped: AtomicBool,
}

impl MemoryPool {
    fn new(
        role: PoolRole,
        runtime: Handle,
        script: VecDeque<StartOutcome>,
        ids: Arc<AtomicU64>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            role,
            this: this.clone(),
            ids,
            max_outbound: AtomicUsize::new(0),
            script: Mutex::new(script),
            start_calls: AtomicUsize::new(0),
            connections: Subscriber::new(runtime.clone(), BACKLOG),
            live: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            runtime,
        })
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Establish a new connection and announce it to subscribers
    pub fn connect(&self) -> Arc<MemoryConnection> {
        let connection = Arc::new(MemoryConnection {
            id: self.ids.fetch_add(1, Ordering::SeqCst) + 1,
            pool: self.this.clone(),
            inventory: Subscriber::new(self.runtime.clone(), BACKLOG),
            connected: AtomicBool::new(!self.is_stopped()),
        });

        if self.is_stopped() {
            connection.inventory.stop(StopReason::ChannelClosed);
            return connection;
        }

        self.live
            .lock()
            .insert(connection.id, Arc::clone(&connection));
        self.connections.relay(Arc::clone(&connection) as PeerConnectionRef);
        connection
    }

    /// Report a failed connection attempt to the pending subscription
    pub fn fail_connection(&self, reason: &str) -> bool {
        self.connections
            .notify_error(NetworkError::Connection(reason.to_string()))
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Transactions handed to `broadcast`, in call order
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn connection_subscriptions(&self) -> u64 {
        self.connections.subscription_count()
    }

    fn forget(&self, id: ConnectionId) {
        self.live.lock().remove(&id);
    }
}

impl ConnectionPool for MemoryPool {
    fn set_max_outbound(&self, count: usize) {
        self.max_outbound.store(count, Ordering::SeqCst);
    }

    fn max_outbound(&self) -> usize {
        self.max_outbound.load(Ordering::SeqCst)
    }

    fn start(&self, on_ready: Handler<()>) {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.is_stopped() {
            Err(NetworkError::ServiceStopped)
        } else {
            match self.script.lock().pop_front() {
                Some(StartOutcome::Fail(reason)) => Err(NetworkError::Connection(reason)),
                Some(StartOutcome::Ready) | None => Ok(()),
            }
        };
        self.runtime.spawn(async move { on_ready(result) });
    }

    fn subscribe_next_connection(&self, handler: Handler<PeerConnectionRef>) {
        self.connections.subscribe(handler);
    }

    fn broadcast(&self, transaction: Transaction, on_sent: Handler<()>) {
        let result = if self.live_connection_count() == 0 {
            Err(NetworkError::NoConnections)
        } else {
            Ok(())
        };
        self.broadcasts.lock().push(transaction);
        self.runtime.spawn(async move { on_sent(result) });
    }

    fn live_connection_count(&self) -> usize {
        self.live.lock().len()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.connections.stop(StopReason::ServiceStopped);

        let live: Vec<_> = self.live.lock().drain().map(|(_, c)| c).collect();
        for connection in live {
            connection.close();
        }
    }
}

/// A connection that announces whatever the caller feeds it
pub struct MemoryConnection {
    id: ConnectionId,
    pool: Weak<MemoryPool>,
    inventory: Subscriber<InventoryMessage>,
    connected: AtomicBool,
}

impl MemoryConnection {
    /// Deliver an inventory announcement as if the peer had sent it
    pub fn announce(&self, message: InventoryMessage) -> bool {
        self.inventory.relay(message)
    }

    /// Simulate the remote side hanging up
    pub fn disconnect(&self) {
        self.close();
        if let Some(pool) = self.pool.upgrade() {
            pool.forget(self.id);
        }
    }

    pub fn inventory_subscriptions(&self) -> u64 {
        self.inventory.subscription_count()
    }

    pub fn has_pending_subscription(&self) -> bool {
        self.inventory.has_pending()
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inventory.stop(StopReason::ChannelClosed);
    }
}

impl PeerConnection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote(&self) -> String {
        format!("memory:{}", self.id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_next_inventory(&self, handler: Handler<InventoryMessage>) {
        self.inventory.subscribe(handler);
    }
}
