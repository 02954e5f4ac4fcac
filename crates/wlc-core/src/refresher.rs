use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::aggregate::{access_point_names, aggregate};
use crate::bridge::{Bridge, BridgeError};
use crate::config::{AccessPointLookup, ExporterConfig};
use crate::snapshot::{AggregatedSnapshot, SnapshotStore};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("client table: {0}")]
    ClientTable(#[source] BridgeError),
    #[error("access point table: {0}")]
    AccessPointTable(#[source] BridgeError),
}

impl RefreshError {
    pub fn url(&self) -> Option<&str> {
        match self {
            RefreshError::ClientTable(err) | RefreshError::AccessPointTable(err) => err.url(),
        }
    }
}

/// Cycle counters shared with the metrics endpoint. Failed cycles never touch
/// the snapshot, so they are tracked here instead.
#[derive(Debug, Default)]
pub struct RefreshStats {
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    last_duration_ms: AtomicU64,
}

impl RefreshStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, elapsed: Duration) {
        self.cycles_ok.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_duration_ms.store(ms, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_ok(&self) -> u64 {
        self.cycles_ok.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn last_duration(&self) -> Duration {
        Duration::from_millis(self.last_duration_ms.load(Ordering::Relaxed))
    }
}

pub struct Refresher<B: Bridge> {
    bridge: B,
    lookup: AccessPointLookup,
    interval: Duration,
    store: Arc<SnapshotStore>,
    stats: Arc<RefreshStats>,
    cycle: u64,
}

impl<B: Bridge> Refresher<B> {
    pub fn new(
        bridge: B,
        lookup: AccessPointLookup,
        interval: Duration,
        store: Arc<SnapshotStore>,
        stats: Arc<RefreshStats>,
    ) -> Self {
        Self {
            bridge,
            lookup,
            interval,
            store,
            stats,
            cycle: 0,
        }
    }

    pub fn from_config(
        bridge: B,
        config: &ExporterConfig,
        store: Arc<SnapshotStore>,
        stats: Arc<RefreshStats>,
    ) -> Self {
        Self::new(
            bridge,
            config.access_point_lookup(),
            config.interval(),
            store,
            stats,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetches, aggregates and publishes one snapshot. On error the store
    /// keeps whatever it held before.
    pub async fn run_cycle(&mut self) -> Result<Arc<AggregatedSnapshot>, RefreshError> {
        let started = Instant::now();

        match self.collect().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.cycle = snapshot.cycle;
                self.store.replace(Arc::clone(&snapshot));

                let elapsed = started.elapsed();
                self.stats.record_success(elapsed);
                debug!(
                    cycle = snapshot.cycle,
                    clients = snapshot.total_clients(),
                    ssids = snapshot.clients_by_ssid.len(),
                    access_points = snapshot.clients_by_access_point.len(),
                    elapsed_ms = %elapsed.as_millis(),
                    "refresh cycle complete"
                );
                Ok(snapshot)
            }
            Err(err) => {
                self.stats.record_failure();
                error!(
                    endpoint = %self.bridge.endpoint(),
                    url = err.url().unwrap_or("-"),
                    error = %err,
                    "refresh cycle failed, keeping previous snapshot"
                );
                Err(err)
            }
        }
    }

    async fn collect(&self) -> Result<AggregatedSnapshot, RefreshError> {
        let ap_names = match &self.lookup {
            AccessPointLookup::Static(names) => Some(Cow::Borrowed(names)),
            AccessPointLookup::BridgeTable => {
                let records = self
                    .bridge
                    .access_point_table()
                    .await
                    .map_err(RefreshError::AccessPointTable)?;
                Some(Cow::Owned(access_point_names(records)))
            }
            AccessPointLookup::Disabled => None,
        };

        let records = self
            .bridge
            .client_table()
            .await
            .map_err(RefreshError::ClientTable)?;

        Ok(aggregate(
            &records,
            ap_names.as_deref(),
            self.cycle + 1,
            Utc::now(),
        ))
    }

    /// Runs a cycle immediately, then one more `interval` after each cycle
    /// finishes. A stop request interrupts the sleep but never a cycle in
    /// flight. Dropping the sender side also stops the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            endpoint = %self.bridge.endpoint(),
            interval_secs = self.interval.as_secs(),
            "refresh loop started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let _ = self.run_cycle().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                _ = sleep(self.interval) => {}
            }
        }

        info!(last_cycle = self.cycle, "refresh loop stopped");
    }

    pub fn spawn(self) -> RefreshHandle
    where
        B: 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        RefreshHandle { shutdown, task }
    }
}

pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the loop and waits until it has left its current sleep or
    /// finished its current cycle.
    pub async fn stop(self) -> Result<(), JoinError> {
        info!("stopping refresh loop");
        let _ = self.shutdown.send(true);
        self.task.await
    }
}
