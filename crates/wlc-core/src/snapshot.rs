use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const UNKNOWN_AP_NAME: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPointCount {
    pub name: String,
    pub clients: u64,
}

/// Counts produced by one successful refresh cycle. Never mutated after
/// construction; readers hold it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedSnapshot {
    pub cycle: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub clients_by_ssid: BTreeMap<String, u64>,
    pub clients_by_protocol: BTreeMap<String, u64>,
    /// Keyed by AP MAC address.
    pub clients_by_access_point: BTreeMap<String, AccessPointCount>,
}

impl AggregatedSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cycle == 0
    }

    pub fn total_clients(&self) -> u64 {
        self.clients_by_ssid.values().sum()
    }
}

/// Holds the latest snapshot for one writer and any number of readers.
///
/// The lock only guards the `Arc` pointer, so `current` never waits on
/// anything slower than another pointer copy.
#[derive(Debug)]
pub struct SnapshotStore {
    inner: RwLock<Arc<AggregatedSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(AggregatedSnapshot::empty())),
        }
    }

    pub fn replace(&self, snapshot: impl Into<Arc<AggregatedSnapshot>>) {
        let next = snapshot.into();
        let previous = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, next)
        };
        // Old maps are freed after the write lock is released.
        drop(previous);
    }

    pub fn current(&self) -> Arc<AggregatedSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
