//! Wiring shared by the monitors

use crate::error::{RelayError, RelayResult};
use crate::inventory::TransactionNotifier;
use crate::rearm::EventRearmer;
use crate::runtime::WorkerPool;
use parking_lot::Mutex;
use radar_core::InventoryMessage;
use radar_network::{ConnectionPool, NetworkResult, PeerConnectionRef};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::NotStarted => "not started",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::Stopping => "stopping",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State machine guarding start and stop
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<MonitorState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::NotStarted),
        }
    }

    pub(crate) fn current(&self) -> MonitorState {
        *self.state.lock()
    }

    /// `NotStarted -> Starting`
    pub(crate) fn begin_start(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        if *state != MonitorState::NotStarted {
            return Err(RelayError::AlreadyStarted);
        }
        *state = MonitorState::Starting;
        Ok(())
    }

    /// Undo `begin_start` when setup failed before anything ran
    pub(crate) fn abort_start(&self) {
        let mut state = self.state.lock();
        if *state == MonitorState::Starting {
            *state = MonitorState::NotStarted;
        }
    }

    /// `Starting -> Running`; false if a stop got there first
    pub(crate) fn promote(&self) -> bool {
        let mut state = self.state.lock();
        if *state != MonitorState::Starting {
            return false;
        }
        *state = MonitorState::Running;
        true
    }

    pub(crate) fn is_stopping(&self) -> bool {
        matches!(
            self.current(),
            MonitorState::Stopping | MonitorState::Stopped
        )
    }

    /// Enter `Stopping`. Returns false if a stop already happened.
    pub(crate) fn begin_stop(&self) -> RelayResult<bool> {
        if WorkerPool::on_worker_thread() {
            return Err(RelayError::StopFromWorker);
        }
        if WorkerPool::in_async_context() {
            return Err(RelayError::StopInAsyncContext);
        }

        let mut state = self.state.lock();
        match *state {
            MonitorState::NotStarted => Err(RelayError::NotStarted),
            MonitorState::Stopping | MonitorState::Stopped => Ok(false),
            MonitorState::Starting | MonitorState::Running => {
                *state = MonitorState::Stopping;
                Ok(true)
            }
        }
    }

    pub(crate) fn finish_stop(&self) {
        *self.state.lock() = MonitorState::Stopped;
    }
}

/// Follow every new connection on `pool` and notify the host of the
/// transaction hashes each one announces.
pub fn watch_connections(
    pool: Arc<dyn ConnectionPool>,
    notifier: TransactionNotifier,
) -> Arc<EventRearmer<PeerConnectionRef>> {
    let rearmer = EventRearmer::new(
        "connections",
        move |handler| pool.subscribe_next_connection(handler),
        move |result: NetworkResult<PeerConnectionRef>| match result {
            Ok(connection) => {
                info!(peer = %connection.remote(), id = connection.id(), "Connection established");
                watch_inventory(connection, notifier.clone());
            }
            Err(e) => warn!("Couldn't start connection: {}", e),
        },
    );
    rearmer.start();
    rearmer
}

/// Keep an inventory subscription open on `connection` until it drops.
pub fn watch_inventory(
    connection: PeerConnectionRef,
    notifier: TransactionNotifier,
) -> Arc<EventRearmer<InventoryMessage>> {
    let rearmer = EventRearmer::new(
        "inventory",
        move |handler| connection.subscribe_next_inventory(handler),
        move |result: NetworkResult<InventoryMessage>| {
            notifier.handle(result);
        },
    );
    rearmer.start();
    rearmer
}

/// Consume every connection and announcement on `pool` without notifying
/// anyone, so a pool used only for sending never builds up a backlog.
pub fn drain_connections(pool: Arc<dyn ConnectionPool>) -> Arc<EventRearmer<PeerConnectionRef>> {
    let rearmer = EventRearmer::new(
        "drained connections",
        move |handler| pool.subscribe_next_connection(handler),
        move |result: NetworkResult<PeerConnectionRef>| match result {
            Ok(connection) => {
                debug!(peer = %connection.remote(), id = connection.id(), "Connection established");
                drain_inventory(connection);
            }
            Err(e) => debug!("Couldn't start connection: {}", e),
        },
    );
    rearmer.start();
    rearmer
}

fn drain_inventory(connection: PeerConnectionRef) -> Arc<EventRearmer<InventoryMessage>> {
    let rearmer = EventRearmer::new(
        "drained inventory",
        move |handler| connection.subscribe_next_inventory(handler),
        |result: NetworkResult<InventoryMessage>| {
            if let Ok(message) = result {
                trace!(vectors = message.len(), "Discarded inventory");
            }
        },
    );
    rearmer.start();
    rearmer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(lifecycle.begin_stop(), Err(RelayError::NotStarted)));

        lifecycle.begin_start().unwrap();
        assert!(matches!(
            lifecycle.begin_start(),
            Err(RelayError::AlreadyStarted)
        ));
        assert!(lifecycle.promote());
        assert!(!lifecycle.promote());
        assert_eq!(lifecycle.current(), MonitorState::Running);

        assert!(lifecycle.begin_stop().unwrap());
        assert!(lifecycle.is_stopping());
        assert!(!lifecycle.begin_stop().unwrap());
        lifecycle.finish_stop();
        assert_eq!(lifecycle.current(), MonitorState::Stopped);
        assert!(matches!(
            lifecycle.begin_start(),
            Err(RelayError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_stop_during_start_blocks_promotion() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();
        assert!(lifecycle.begin_stop().unwrap());
        assert!(!lifecycle.promote());
    }

    #[tokio::test]
    async fn test_stop_inside_host_runtime_is_refused() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();
        assert!(matches!(
            lifecycle.begin_stop(),
            Err(RelayError::StopInAsyncContext)
        ));
        assert_eq!(lifecycle.current(), MonitorState::Starting);
    }

    #[test]
    fn test_abort_start_resets() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();
        lifecycle.abort_start();
        assert_eq!(lifecycle.current(), MonitorState::NotStarted);
        assert_eq!(MonitorState::NotStarted.to_string(), "not started");
    }
}
