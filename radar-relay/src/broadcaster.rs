//! Dual-pool broadcaster
//!
//! One pool pushes host-supplied transactions out to the network, the other
//! watches for announcements. The monitor pool is started only after the
//! broadcast pool is up; either failure is reported to the host once and
//! nothing is retried.

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::host::{HostBridge, HostFunction, OnNewTransaction, OnStarted};
use crate::inventory::TransactionNotifier;
use crate::logging::Logger;
use crate::monitor::{drain_connections, watch_connections, Lifecycle, MonitorState};
use crate::runtime::WorkerPool;
use parking_lot::Mutex;
use radar_core::{Hash, Transaction};
use radar_network::{ConnectionPool, PoolFactory, PoolRole, TcpPoolFactory};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

struct Session {
    workers: WorkerPool,
    broadcast_pool: Arc<dyn ConnectionPool>,
    monitor_pool: Arc<dyn ConnectionPool>,
}

impl Session {
    fn close(self, wait: bool) {
        self.broadcast_pool.stop();
        self.monitor_pool.stop();
        if wait {
            self.workers.shutdown();
        } else {
            self.workers.shutdown_background();
        }
    }
}

struct BroadcasterInner {
    factory: Arc<dyn PoolFactory>,
    logger: Logger,
    bridge: Arc<HostBridge>,
    lifecycle: Lifecycle,
    session: Mutex<Option<Session>>,
}

impl Drop for BroadcasterInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.close(!WorkerPool::in_async_context());
        }
    }
}

/// Handle to a dual-pool broadcaster. Clones share the same monitor.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Broadcaster {
    pub fn new(factory: Arc<dyn PoolFactory>, logger: Logger) -> Self {
        Self::with_bridge(factory, logger, Arc::new(HostBridge::new()))
    }

    pub fn with_bridge(
        factory: Arc<dyn PoolFactory>,
        logger: Logger,
        bridge: Arc<HostBridge>,
    ) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                factory,
                logger,
                bridge,
                lifecycle: Lifecycle::new(),
                session: Mutex::new(None),
            }),
        }
    }

    /// Broadcaster over TCP pools, logging as configured
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let factory = Arc::new(TcpPoolFactory::new(config.pool.clone()));
        Ok(Self::new(factory, Logger::from_config(&config.log)?))
    }

    pub fn bridge(&self) -> &Arc<HostBridge> {
        &self.inner.bridge
    }

    pub fn state(&self) -> MonitorState {
        self.inner.lifecycle.current()
    }

    /// Start both pools in sequence.
    ///
    /// Returns once the worker runtime is up; the outcome of the pool startup is
    /// reported later through `on_started`, with `None` on success.
    pub fn start<N, S>(
        &self,
        threads: usize,
        broadcast_hosts: usize,
        monitor_hosts: usize,
        on_new_tx: N,
        on_started: S,
    ) -> RelayResult<()>
    where
        N: Fn(Hash) -> anyhow::Result<()> + Send + Sync + 'static,
        S: Fn(Option<String>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.lifecycle.begin_start()?;

        let workers = match WorkerPool::new(threads, "broadcaster", &inner.logger) {
            Ok(workers) => workers,
            Err(e) => {
                inner.lifecycle.abort_start();
                return Err(e);
            }
        };

        let broadcast_pool = inner
            .factory
            .create_pool(PoolRole::Broadcast, workers.handle());
        broadcast_pool.set_max_outbound(broadcast_hosts);
        let monitor_pool = inner.factory.create_pool(PoolRole::Monitor, workers.handle());
        monitor_pool.set_max_outbound(monitor_hosts);

        let on_new_tx: OnNewTransaction =
            HostFunction::new("on_new_tx", Arc::clone(&inner.bridge), on_new_tx);
        let on_started: OnStarted =
            HostFunction::new("on_started", Arc::clone(&inner.bridge), on_started);

        let first = Arc::clone(&broadcast_pool);
        *inner.session.lock() = Some(Session {
            workers,
            broadcast_pool,
            monitor_pool: Arc::clone(&monitor_pool),
        });

        inner.logger.in_scope(|| {
            info!(threads, broadcast_hosts, monitor_hosts, "Starting broadcaster")
        });
        start_broadcast_pool(Arc::downgrade(inner), first, monitor_pool, on_new_tx, on_started);
        Ok(())
    }

    /// Parse `raw` and hand it to the broadcast pool.
    ///
    /// False if the bytes are not a transaction or the broadcaster is not
    /// started. Delivery to peers is not awaited.
    pub fn broadcast(&self, raw: &[u8]) -> bool {
        let pool = match self.inner.session.lock().as_ref() {
            Some(session) => Arc::clone(&session.broadcast_pool),
            None => return false,
        };

        let transaction = match Transaction::parse(raw) {
            Ok(transaction) => transaction,
            Err(e) => {
                self.inner
                    .logger
                    .in_scope(|| debug!("Rejected broadcast: {}", e));
                return false;
            }
        };

        let hash = transaction.hash();
        pool.broadcast(
            transaction,
            Box::new(move |result| {
                if let Err(e) = result {
                    debug!(tx = %hash, "Broadcast not delivered: {}", e);
                }
            }),
        );
        true
    }

    /// Stop both pools and join the workers. In-flight callbacks finish first.
    ///
    /// Fails with `StopFromWorker` when called from a callback and with
    /// `StopInAsyncContext` when called from inside another tokio runtime.
    pub fn stop(&self) -> RelayResult<()> {
        if !self.inner.lifecycle.begin_stop()? {
            return Ok(());
        }

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.close(true);
        }

        self.inner.lifecycle.finish_stop();
        self.inner.logger.in_scope(|| info!("Broadcaster stopped"));
        Ok(())
    }
}

fn start_broadcast_pool(
    inner: Weak<BroadcasterInner>,
    broadcast_pool: Arc<dyn ConnectionPool>,
    monitor_pool: Arc<dyn ConnectionPool>,
    on_new_tx: OnNewTransaction,
    on_started: OnStarted,
) {
    let pool = Arc::clone(&broadcast_pool);
    broadcast_pool.start(Box::new(move |result| {
        if let Err(e) = result {
            error!("Broadcast pool failed to start: {}", e);
            on_started.call(Some(e.to_string()));
            return;
        }

        info!("Broadcast pool started");
        drain_connections(pool);
        start_monitor_pool(inner, monitor_pool, on_new_tx, on_started);
    }));
}

fn start_monitor_pool(
    inner: Weak<BroadcasterInner>,
    monitor_pool: Arc<dyn ConnectionPool>,
    on_new_tx: OnNewTransaction,
    on_started: OnStarted,
) {
    let pool = Arc::clone(&monitor_pool);
    monitor_pool.start(Box::new(move |result| {
        if let Err(e) = result {
            error!("Monitor pool failed to start: {}", e);
            on_started.call(Some(e.to_string()));
            return;
        }

        let Some(inner) = inner.upgrade() else { return };
        if !inner.lifecycle.promote() {
            debug!("Broadcaster stopping, not watching connections");
            return;
        }

        info!("Monitor pool started");
        watch_connections(pool, TransactionNotifier::new(on_new_tx));
        on_started.call(None);
    }));
}
