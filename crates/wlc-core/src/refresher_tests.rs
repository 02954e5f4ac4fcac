use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::{sleep, timeout};

use crate::bridge::{AccessPointRecord, AssociationRecord, Bridge, BridgeError};
use crate::config::AccessPointLookup;
use crate::refresher::{RefreshError, RefreshStats, Refresher};
use crate::snapshot::SnapshotStore;

enum Outcome {
    Clients(Vec<AssociationRecord>),
    Unavailable,
}

/// Replays scripted client-table outcomes; once the script runs out it keeps
/// answering with the last successful table.
struct FakeBridge {
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Vec<AssociationRecord>>,
    access_points: Option<Vec<AccessPointRecord>>,
    delay: Duration,
    client_calls: Arc<AtomicUsize>,
    ap_calls: Arc<AtomicUsize>,
}

impl FakeBridge {
    fn new(script: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Vec::new()),
            access_points: None,
            delay: Duration::ZERO,
            client_calls: Arc::new(AtomicUsize::new(0)),
            ap_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_access_points(mut self, access_points: Option<Vec<AccessPointRecord>>) -> Self {
        self.access_points = access_points;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn unavailable(url: &str) -> BridgeError {
        BridgeError::Status {
            url: url.to_string(),
            status: StatusCode::BAD_GATEWAY,
        }
    }
}

#[async_trait]
impl Bridge for FakeBridge {
    async fn client_table(&self) -> Result<Vec<AssociationRecord>, BridgeError> {
        self.client_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Outcome::Clients(records)) => {
                *self.last.lock().expect("last lock") = records.clone();
                Ok(records)
            }
            Some(Outcome::Unavailable) => Err(Self::unavailable("http://bridge.test/clients")),
            None => Ok(self.last.lock().expect("last lock").clone()),
        }
    }

    async fn access_point_table(&self) -> Result<Vec<AccessPointRecord>, BridgeError> {
        self.ap_calls.fetch_add(1, Ordering::SeqCst);
        self.access_points
            .clone()
            .ok_or_else(|| Self::unavailable("http://bridge.test/aps"))
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }
}

fn record(ssid: &str, protocol: &str, ap_mac: &str) -> AssociationRecord {
    AssociationRecord {
        ssid: ssid.to_string(),
        protocol: protocol.to_string(),
        ap_mac: ap_mac.to_string(),
    }
}

fn build_refresher(
    bridge: FakeBridge,
    lookup: AccessPointLookup,
    interval: Duration,
) -> (Refresher<FakeBridge>, Arc<SnapshotStore>, Arc<RefreshStats>) {
    let store = Arc::new(SnapshotStore::new());
    let stats = Arc::new(RefreshStats::new());
    let refresher = Refresher::new(
        bridge,
        lookup,
        interval,
        Arc::clone(&store),
        Arc::clone(&stats),
    );
    (refresher, store, stats)
}

#[tokio::test]
async fn successful_cycle_publishes_snapshot() {
    // Arrange
    let bridge = FakeBridge::new(vec![Outcome::Clients(vec![
        record("guest", "dot11ac", "AA:BB"),
        record("guest", "dot11n", "AA:BB"),
    ])])
    .with_access_points(Some(vec![AccessPointRecord {
        mac: "AA:BB".to_string(),
        name: "lobby-ap".to_string(),
    }]));
    let (mut refresher, store, stats) =
        build_refresher(bridge, AccessPointLookup::BridgeTable, Duration::from_secs(60));

    // Act
    let published = refresher.run_cycle().await.expect("cycle succeeds");

    // Assert
    let current = store.current();
    assert!(Arc::ptr_eq(&published, &current));
    assert_eq!(current.cycle, 1);
    assert_eq!(current.clients_by_ssid["guest"], 2);
    assert_eq!(current.clients_by_protocol["ac"], 1);
    assert_eq!(current.clients_by_protocol["n"], 1);
    assert_eq!(current.clients_by_access_point["AA:BB"].clients, 2);
    assert_eq!(current.clients_by_access_point["AA:BB"].name, "lobby-ap");
    assert_eq!(stats.cycles_ok(), 1);
    assert_eq!(stats.cycles_failed(), 0);
}

#[tokio::test]
async fn failed_cycle_keeps_previous_snapshot() {
    // Arrange
    let bridge = FakeBridge::new(vec![
        Outcome::Clients(vec![record("guest", "dot11ac", "AA:BB")]),
        Outcome::Unavailable,
        Outcome::Clients(vec![
            record("corp", "dot11ax", "AA:BB"),
            record("corp", "dot11ax", "AA:BB"),
        ]),
    ]);
    let (mut refresher, store, stats) =
        build_refresher(bridge, AccessPointLookup::Disabled, Duration::from_secs(60));
    refresher.run_cycle().await.expect("first cycle succeeds");
    let before = store.current();

    // Act
    let failed = refresher.run_cycle().await;

    // Assert
    assert!(matches!(failed, Err(RefreshError::ClientTable(_))));
    assert!(Arc::ptr_eq(&before, &store.current()));
    assert_eq!(stats.cycles_failed(), 1);

    let recovered = refresher.run_cycle().await.expect("third cycle succeeds");
    assert_eq!(recovered.cycle, 2);
    assert_eq!(recovered.clients_by_ssid.get("corp"), Some(&2));
    assert!(!recovered.clients_by_ssid.contains_key("guest"));
    assert_eq!(stats.cycles_ok(), 2);
}

#[tokio::test]
async fn unreachable_bridge_leaves_store_empty() {
    let bridge = FakeBridge::new(vec![Outcome::Unavailable]);
    let (mut refresher, store, _stats) =
        build_refresher(bridge, AccessPointLookup::Disabled, Duration::from_secs(60));

    let err = refresher.run_cycle().await.expect_err("cycle fails");

    assert_eq!(err.url(), Some("http://bridge.test/clients"));
    assert!(store.current().is_empty());
}

#[tokio::test]
async fn access_point_table_failure_aborts_cycle() {
    let bridge = FakeBridge::new(vec![Outcome::Clients(vec![record("guest", "dot11ac", "AA:BB")])])
        .with_access_points(None);
    let client_calls = Arc::clone(&bridge.client_calls);
    let (mut refresher, store, stats) =
        build_refresher(bridge, AccessPointLookup::BridgeTable, Duration::from_secs(60));

    let result = refresher.run_cycle().await;

    assert!(matches!(result, Err(RefreshError::AccessPointTable(_))));
    assert_eq!(client_calls.load(Ordering::SeqCst), 0);
    assert!(store.current().is_empty());
    assert_eq!(stats.cycles_failed(), 1);
}

#[tokio::test]
async fn static_names_skip_the_ap_table() {
    // Arrange
    let bridge = FakeBridge::new(vec![Outcome::Clients(vec![
        record("guest", "dot11ac", "AA:BB"),
        record("guest", "dot11ac", "FF:FF"),
    ])]);
    let ap_calls = Arc::clone(&bridge.ap_calls);
    let mut names = BTreeMap::new();
    names.insert("AA:BB".to_string(), "lobby-ap".to_string());
    let (mut refresher, _store, _stats) =
        build_refresher(bridge, AccessPointLookup::Static(names), Duration::from_secs(60));

    // Act
    let snapshot = refresher.run_cycle().await.expect("cycle succeeds");

    // Assert
    assert_eq!(ap_calls.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot.clients_by_ssid["guest"], 2);
    assert_eq!(snapshot.clients_by_access_point.len(), 1);
    assert_eq!(snapshot.clients_by_access_point["AA:BB"].clients, 1);
}

#[tokio::test]
async fn loop_keeps_scheduling_after_failures() {
    // Arrange
    let bridge = FakeBridge::new(vec![
        Outcome::Unavailable,
        Outcome::Unavailable,
        Outcome::Clients(vec![record("guest", "dot11g", "AA:BB")]),
    ]);
    let (refresher, store, stats) =
        build_refresher(bridge, AccessPointLookup::Disabled, Duration::from_millis(10));

    // Act
    let handle = refresher.spawn();
    let published = timeout(Duration::from_secs(5), async {
        while store.current().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.stop().await.expect("loop task joins");

    // Assert
    assert!(published.is_ok(), "loop never recovered from failed cycles");
    assert_eq!(stats.cycles_failed(), 2);
    assert_eq!(store.current().clients_by_protocol.get("g"), Some(&1));
}

#[tokio::test]
async fn stop_wakes_a_sleeping_loop() {
    let bridge = FakeBridge::new(vec![Outcome::Clients(vec![record("guest", "dot11a", "AA:BB")])]);
    let client_calls = Arc::clone(&bridge.client_calls);
    let (refresher, store, _stats) =
        build_refresher(bridge, AccessPointLookup::Disabled, Duration::from_secs(3600));

    let handle = refresher.spawn();
    timeout(Duration::from_secs(5), async {
        while store.current().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first cycle runs immediately");

    let stopped = timeout(Duration::from_secs(2), handle.stop()).await;

    assert!(matches!(stopped, Ok(Ok(()))), "stop waited for the full interval");
    assert_eq!(client_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_lets_an_in_flight_cycle_finish() {
    // Arrange
    let bridge = FakeBridge::new(vec![Outcome::Clients(vec![record("guest", "dot11n", "AA:BB")])])
        .with_delay(Duration::from_millis(200));
    let client_calls = Arc::clone(&bridge.client_calls);
    let (refresher, store, stats) =
        build_refresher(bridge, AccessPointLookup::Disabled, Duration::from_secs(3600));
    let handle = refresher.spawn();

    timeout(Duration::from_secs(5), async {
        while client_calls.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("cycle started");

    // Act
    handle.stop().await.expect("loop task joins");

    // Assert
    assert_eq!(stats.cycles_ok(), 1);
    assert_eq!(store.current().cycle, 1);
    assert_eq!(store.current().clients_by_protocol.get("n"), Some(&1));
}
