//! Propagation radar
//!
//! Tracks transactions the host asked about and reports, on every sighting, the
//! share of monitored hosts that have announced each one so far.

use crate::error::RelayResult;
use crate::host::{HostBridge, HostFunction};
use crate::sentinel::Sentinel;
use parking_lot::Mutex;
use radar_core::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Tracked {
    sightings: usize,
    on_progress: HostFunction<f64>,
}

struct RadarInner {
    radar_hosts: usize,
    bridge: Arc<HostBridge>,
    tracked: Mutex<HashMap<Hash, Tracked>>,
}

#[derive(Clone)]
pub struct TxRadar {
    inner: Arc<RadarInner>,
}

impl TxRadar {
    pub fn new(radar_hosts: usize, bridge: Arc<HostBridge>) -> Self {
        Self {
            inner: Arc::new(RadarInner {
                radar_hosts,
                bridge,
                tracked: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Radar sharing the sentinel's host bridge
    pub fn for_sentinel(sentinel: &Sentinel, radar_hosts: usize) -> Self {
        Self::new(radar_hosts, Arc::clone(sentinel.bridge()))
    }

    pub fn radar_hosts(&self) -> usize {
        self.inner.radar_hosts
    }

    /// Start reporting sightings of `hash` to `on_progress`.
    ///
    /// Monitoring a hash again replaces its callback and resets its count.
    pub fn monitor<F>(&self, hash: Hash, on_progress: F)
    where
        F: Fn(f64) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let on_progress = HostFunction::new("on_progress", Arc::clone(&self.inner.bridge), on_progress);
        self.inner.tracked.lock().insert(
            hash,
            Tracked {
                sightings: 0,
                on_progress,
            },
        );
    }

    /// Stop tracking `hash`; true if it was tracked
    pub fn forget(&self, hash: &Hash) -> bool {
        self.inner.tracked.lock().remove(hash).is_some()
    }

    /// Record one sighting and report the new ratio.
    ///
    /// Returns `None` for hashes nobody asked about.
    pub fn on_new_tx(&self, hash: Hash) -> Option<f64> {
        let (ratio, on_progress) = {
            let mut tracked = self.inner.tracked.lock();
            let entry = tracked.get_mut(&hash)?;
            entry.sightings += 1;
            (
                propagation_ratio(entry.sightings, self.inner.radar_hosts),
                entry.on_progress.clone(),
            )
        };

        debug!(tx = %hash, ratio, "Transaction sighted");
        on_progress.call(ratio);
        Some(ratio)
    }

    pub fn ratio(&self, hash: &Hash) -> Option<f64> {
        let tracked = self.inner.tracked.lock();
        tracked
            .get(hash)
            .map(|entry| propagation_ratio(entry.sightings, self.inner.radar_hosts))
    }

    pub fn sightings(&self, hash: &Hash) -> Option<usize> {
        self.inner.tracked.lock().get(hash).map(|entry| entry.sightings)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked.lock().len()
    }

    /// Start `sentinel` with this radar as its transaction callback
    pub fn start<S>(&self, sentinel: &Sentinel, threads: usize, on_started: S) -> RelayResult<()>
    where
        S: Fn(Option<String>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let radar = self.clone();
        sentinel.start(
            threads,
            self.inner.radar_hosts,
            move |hash| {
                radar.on_new_tx(hash);
                Ok(())
            },
            on_started,
        )
    }
}

fn propagation_ratio(sightings: usize, radar_hosts: usize) -> f64 {
    (sightings as f64 / radar_hosts.max(1) as f64).min(1.0)
}
