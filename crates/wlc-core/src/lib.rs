pub mod aggregate;
pub mod bridge;
pub mod config;
pub mod refresher;
pub mod snapshot;

#[cfg(test)]
mod refresher_tests;

pub use aggregate::{aggregate, normalize_protocol};
pub use bridge::{AccessPointRecord, AssociationRecord, Bridge, BridgeError, HttpBridge};
pub use config::{AccessPointLookup, ExporterConfig};
pub use refresher::{RefreshError, RefreshHandle, RefreshStats, Refresher};
pub use snapshot::{AccessPointCount, AggregatedSnapshot, SnapshotStore, UNKNOWN_AP_NAME};
