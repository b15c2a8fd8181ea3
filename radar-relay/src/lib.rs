//! Transaction announcement relay
//!
//! This crate drives the network pools on behalf of a host application:
//! - [`Broadcaster`]: pushes host transactions out and watches announcements
//! - [`Sentinel`]: watches announcements through one pool, restarting it until it comes up
//! - [`TxRadar`]: turns sightings into per-transaction propagation ratios
//!
//! Host callbacks always run through a [`HostBridge`], one at a time, with
//! failures caught and logged.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod host;
pub mod inventory;
pub mod logging;
pub mod monitor;
pub mod radar;
pub mod rearm;
pub mod runtime;
pub mod sentinel;

pub use broadcaster::Broadcaster;
pub use config::RelayConfig;
pub use error::{HostCallbackError, RelayError, RelayResult};
pub use host::{HostBridge, HostFunction, HostGuard, OnNewTransaction, OnStarted};
pub use inventory::{NotifySummary, TransactionNotifier};
pub use logging::{
    ConsoleSink, Echo, FileSink, LogConfig, LogSink, LogSinks, Logger, NullSink, Severity,
    SinkLayer,
};
pub use monitor::{watch_connections, watch_inventory, MonitorState};
pub use radar::TxRadar;
pub use rearm::EventRearmer;
pub use runtime::WorkerPool;
pub use sentinel::Sentinel;
