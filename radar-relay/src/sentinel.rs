//! Single-pool sentinel
//!
//! Watches the network through one pool and keeps trying to start it until it
//! comes up. There is no backoff and no attempt limit: the sentinel is meant to
//! sit on a flaky link and recover on its own.

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::host::{HostBridge, HostFunction, OnNewTransaction, OnStarted};
use crate::inventory::TransactionNotifier;
use crate::logging::Logger;
use crate::monitor::{watch_connections, Lifecycle, MonitorState};
use crate::runtime::WorkerPool;
use parking_lot::Mutex;
use radar_core::Hash;
use radar_network::{ConnectionPool, NetworkError, PoolFactory, PoolRole, TcpPoolFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

struct Session {
    workers: WorkerPool,
    pool: Arc<dyn ConnectionPool>,
}

struct SentinelInner {
    factory: Arc<dyn PoolFactory>,
    logger: Logger,
    bridge: Arc<HostBridge>,
    lifecycle: Lifecycle,
    session: Mutex<Option<Session>>,
    attempts: AtomicU64,
}

impl Drop for SentinelInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.pool.stop();
            if WorkerPool::in_async_context() {
                session.workers.shutdown_background();
            } else {
                session.workers.shutdown();
            }
        }
    }
}

#[derive(Clone)]
pub struct Sentinel {
    inner: Arc<SentinelInner>,
}

impl Sentinel {
    pub fn new(factory: Arc<dyn PoolFactory>, logger: Logger) -> Self {
        Self::with_bridge(factory, logger, Arc::new(HostBridge::new()))
    }

    pub fn with_bridge(
        factory: Arc<dyn PoolFactory>,
        logger: Logger,
        bridge: Arc<HostBridge>,
    ) -> Self {
        Self {
            inner: Arc::new(SentinelInner {
                factory,
                logger,
                bridge,
                lifecycle: Lifecycle::new(),
                session: Mutex::new(None),
                attempts: AtomicU64::new(0),
            }),
        }
    }

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

    /// Number of pool start attempts so far
    pub fn start_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Live connections of the pool, 0 when not started
    pub fn live_connection_count(&self) -> usize {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.pool.live_connection_count())
            .unwrap_or(0)
    }

    /// Start the pool, retrying until it comes up.
    ///
    /// `on_started(None)` fires once, after the first successful start.
    pub fn start<N, S>(
        &self,
        threads: usize,
        hosts: usize,
        on_new_tx: N,
        on_started: S,
    ) -> RelayResult<()>
    where
        N: Fn(Hash) -> anyhow::Result<()> + Send + Sync + 'static,
        S: Fn(Option<String>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.lifecycle.begin_start()?;

        let workers = match WorkerPool::new(threads, "sentinel", &inner.logger) {
            Ok(workers) => workers,
            Err(e) => {
                inner.lifecycle.abort_start();
                return Err(e);
            }
        };

        let pool = inner.factory.create_pool(PoolRole::Monitor, workers.handle());
        pool.set_max_outbound(hosts);
        *inner.session.lock() = Some(Session {
            workers,
            pool: Arc::clone(&pool),
        });

        let on_new_tx: OnNewTransaction =
            HostFunction::new("on_new_tx", Arc::clone(&inner.bridge), on_new_tx);
        let on_started: OnStarted =
            HostFunction::new("on_started", Arc::clone(&inner.bridge), on_started);

        inner
            .logger
            .in_scope(|| info!(threads, hosts, "Starting sentinel"));
        start_until_ready(Arc::downgrade(inner), pool, on_new_tx, on_started);
        Ok(())
    }

    pub fn stop(&self) -> RelayResult<()> {
        if !self.inner.lifecycle.begin_stop()? {
            return Ok(());
        }

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.pool.stop();
            session.workers.shutdown();
        }

        self.inner.lifecycle.finish_stop();
        self.inner.logger.in_scope(|| info!("Sentinel stopped"));
        Ok(())
    }
}

fn start_until_ready(
    inner: Weak<SentinelInner>,
    pool: Arc<dyn ConnectionPool>,
    on_new_tx: OnNewTransaction,
    on_started: OnStarted,
) {
    match inner.upgrade() {
        Some(sentinel) => sentinel.attempts.fetch_add(1, Ordering::SeqCst),
        None => return,
    };

    let retry = Arc::clone(&pool);
    pool.start(Box::new(move |result| {
        let Some(sentinel) = inner.upgrade() else { return };

        match result {
            Ok(()) => {
                if !sentinel.lifecycle.promote() {
                    debug!("Sentinel stopping, not watching connections");
                    return;
                }
                info!(attempts = sentinel.attempts.load(Ordering::SeqCst), "Sentinel started");
                drop(sentinel);
                watch_connections(retry, TransactionNotifier::new(on_new_tx));
                on_started.call(None);
            }
            Err(NetworkError::ServiceStopped) => {
                debug!("Pool stopped, no further start attempts");
            }
            Err(e) => {
                if sentinel.lifecycle.is_stopping() {
                    return;
                }
                warn!(reason = %e, "Restarting connection...");
                drop(sentinel);
                start_until_ready(inner, retry, on_new_tx, on_started);
            }
        }
    }));
}
