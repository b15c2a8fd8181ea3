//! Outbound TCP connection pool

use crate::bootstrap::SeedResolver;
use crate::channel::TcpChannel;
use crate::config::PoolConfig;
use crate::error::{NetworkError, NetworkResult, StopReason};
use crate::subscriber::{Handler, Subscriber};
use crate::traits::{
    ConnectionId, ConnectionPool, PeerConnection, PeerConnectionRef, PoolFactory, PoolRole,
};
use crate::transport;
use bitcoin::p2p::message::NetworkMessage;
use parking_lot::Mutex;
use radar_core::Transaction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps up to `max_outbound` handshaken peers connected.
///
/// New connections are announced through `subscribe_next_connection`. Dropped
/// peers are replaced by the maintenance task.
#[derive(Clone)]
pub struct TcpConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    role: PoolRole,
    config: PoolConfig,
    runtime: Handle,
    resolver: SeedResolver,
    max_outbound: AtomicUsize,
    next_id: AtomicU64,
    channels: Mutex<HashMap<ConnectionId, Arc<TcpChannel>>>,
    connections: Subscriber<PeerConnectionRef>,
    maintaining: AtomicBool,
    cancel: CancellationToken,
}

impl TcpConnectionPool {
    pub fn new(role: PoolRole, config: PoolConfig, runtime: Handle) -> Self {
        let connections = Subscriber::new(runtime.clone(), config.backlog_capacity);
        Self {
            inner: Arc::new(PoolInner {
                role,
                resolver: SeedResolver::from_config(&config),
                max_outbound: AtomicUsize::new(config.max_outbound),
                next_id: AtomicU64::new(1),
                channels: Mutex::new(HashMap::new()),
                connections,
                maintaining: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                config,
                runtime,
            }),
        }
    }

    pub fn role(&self) -> PoolRole {
        self.inner.role
    }

    /// Addresses of the currently live channels
    pub fn connected_addresses(&self) -> Vec<SocketAddr> {
        self.inner
            .channels
            .lock()
            .values()
            .map(|channel| channel.address())
            .collect()
    }
}

impl PoolInner {
    fn live(&self) -> usize {
        self.channels.lock().len()
    }

    fn is_connected_to(&self, address: SocketAddr) -> bool {
        self.channels
            .lock()
            .values()
            .any(|channel| channel.address() == address)
    }

    fn forget(&self, id: ConnectionId) {
        if let Some(channel) = self.channels.lock().remove(&id) {
            info!(role = %self.role, peer = %channel.address(), "Connection dropped");
        }
    }
}

impl ConnectionPool for TcpConnectionPool {
    fn set_max_outbound(&self, count: usize) {
        self.inner.max_outbound.store(count, Ordering::SeqCst);
    }

    fn max_outbound(&self) -> usize {
        self.inner.max_outbound.load(Ordering::SeqCst)
    }

    fn start(&self, on_ready: Handler<()>) {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            if inner.cancel.is_cancelled() {
                on_ready(Err(NetworkError::ServiceStopped));
                return;
            }
            if let Err(e) = inner.config.validate() {
                on_ready(Err(NetworkError::Config(e)));
                return;
            }

            match inner.resolver.resolve().await {
                Ok(candidates) => {
                    if !inner.maintaining.swap(true, Ordering::SeqCst) {
                        info!(
                            role = %inner.role,
                            candidates = candidates.len(),
                            target = inner.max_outbound.load(Ordering::SeqCst),
                            "Connection pool started"
                        );
                        tokio::spawn(maintain_outbound(Arc::clone(&inner), candidates));
                    }
                    on_ready(Ok(()));
                }
                Err(e) => on_ready(Err(e)),
            }
        });
    }

    fn subscribe_next_connection(&self, handler: Handler<PeerConnectionRef>) {
        self.inner.connections.subscribe(handler);
    }

    fn broadcast(&self, transaction: Transaction, on_sent: Handler<()>) {
        let channels: Vec<Arc<TcpChannel>> =
            self.inner.channels.lock().values().cloned().collect();
        let message = NetworkMessage::Tx(transaction.into_bitcoin());

        let sent = channels
            .iter()
            .filter(|channel| channel.send(message.clone()).is_ok())
            .count();
        debug!(role = %self.inner.role, peers = sent, "Broadcast transaction");

        let result = if sent > 0 {
            Ok(())
        } else {
            Err(NetworkError::NoConnections)
        };
        self.inner.runtime.spawn(async move { on_sent(result) });
    }

    fn live_connection_count(&self) -> usize {
        self.inner.live()
    }

    fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.connections.stop(StopReason::ServiceStopped);

        let channels: Vec<Arc<TcpChannel>> =
            self.inner.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.close();
        }
    }
}

/// Dial candidates until the outbound target is met, then keep it met.
async fn maintain_outbound(inner: Arc<PoolInner>, candidates: Vec<SocketAddr>) {
    let mut candidates: VecDeque<SocketAddr> = candidates.into();
    let mut attempts: JoinSet<(SocketAddr, NetworkResult<Arc<TcpChannel>>)> = JoinSet::new();
    let mut dialing: HashSet<SocketAddr> = HashSet::new();

    loop {
        let target = inner.max_outbound.load(Ordering::SeqCst);
        while inner.live() + attempts.len() < target {
            if candidates.is_empty() {
                match inner.resolver.resolve().await {
                    Ok(fresh) => candidates.extend(fresh),
                    Err(e) => {
                        warn!(role = %inner.role, "Peer discovery failed: {}", e);
                        break;
                    }
                }
            }
            let Some(address) = candidates.pop_front() else { break };
            if dialing.contains(&address) || inner.is_connected_to(address) {
                // Nothing left to dial this round.
                if candidates.is_empty() {
                    break;
                }
                continue;
            }

            dialing.insert(address);
            let dialer = Arc::clone(&inner);
            attempts.spawn(async move { (address, establish(dialer, address).await) });
        }

        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                let Ok((address, result)) = joined else { continue };
                dialing.remove(&address);
                match result {
                    Ok(channel) => register(&inner, channel),
                    Err(e) => {
                        debug!(role = %inner.role, peer = %address, "Connection attempt failed: {}", e);
                        inner.connections.notify_error(e);
                    }
                }
            }
            _ = tokio::time::sleep(inner.config.maintenance_interval()) => {}
        }
    }

    attempts.shutdown().await;
}

async fn establish(inner: Arc<PoolInner>, address: SocketAddr) -> NetworkResult<Arc<TcpChannel>> {
    let (stream, version) = transport::connect(address, &inner.config).await?;
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let pool: Weak<PoolInner> = Arc::downgrade(&inner);

    Ok(TcpChannel::spawn(
        id,
        address,
        stream,
        version.user_agent,
        &inner.config,
        &inner.runtime,
        Box::new(move |id| {
            if let Some(pool) = pool.upgrade() {
                pool.forget(id);
            }
        }),
    ))
}

fn register(inner: &PoolInner, channel: Arc<TcpChannel>) {
    if inner.cancel.is_cancelled() {
        channel.close();
        return;
    }

    info!(
        role = %inner.role,
        peer = %channel.address(),
        user_agent = %channel.user_agent(),
        "Peer connected"
    );
    inner.channels.lock().insert(channel.id(), Arc::clone(&channel));
    inner.connections.relay(channel);
}

/// Builds [`TcpConnectionPool`]s from a shared configuration
#[derive(Debug, Clone)]
pub struct TcpPoolFactory {
    config: PoolConfig,
}

impl TcpPoolFactory {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl PoolFactory for TcpPoolFactory {
    fn create_pool(&self, role: PoolRole, runtime: &Handle) -> Arc<dyn ConnectionPool> {
        Arc::new(TcpConnectionPool::new(role, self.config.clone(), runtime.clone()))
    }
}
