use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::bridge::{AccessPointRecord, AssociationRecord};
use crate::snapshot::{AccessPointCount, AggregatedSnapshot, UNKNOWN_AP_NAME};

/// Vendor prefixes carried by raw `cldcClientProtocol` values.
pub const KNOWN_PROTOCOL_PREFIXES: [&str; 1] = ["dot11"];

/// `dot11ac` -> `ac`. Values without a known prefix pass through, as does a
/// bare prefix that would otherwise normalize to an empty label.
pub fn normalize_protocol(raw: &str) -> &str {
    for prefix in KNOWN_PROTOCOL_PREFIXES {
        if let Some(rest) = raw.strip_prefix(prefix) {
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    raw
}

pub fn access_point_names(records: Vec<AccessPointRecord>) -> BTreeMap<String, String> {
    records
        .into_iter()
        .map(|record| (record.mac, record.name))
        .collect()
}

/// Builds a snapshot from one cycle's association records.
///
/// With an AP name table, every known AP starts at zero and records whose
/// AP MAC is not in the table are left out of the per-AP counts only.
/// Without one, the per-AP dimension stays empty.
pub fn aggregate(
    records: &[AssociationRecord],
    ap_names: Option<&BTreeMap<String, String>>,
    cycle: u64,
    generated_at: DateTime<Utc>,
) -> AggregatedSnapshot {
    let mut clients_by_ssid: BTreeMap<String, u64> = BTreeMap::new();
    let mut clients_by_protocol: BTreeMap<String, u64> = BTreeMap::new();
    let mut clients_by_access_point: BTreeMap<String, AccessPointCount> = ap_names
        .map(|names| {
            names
                .iter()
                .map(|(mac, name)| {
                    let name = if name.is_empty() {
                        UNKNOWN_AP_NAME.to_string()
                    } else {
                        name.clone()
                    };
                    (mac.clone(), AccessPointCount { name, clients: 0 })
                })
                .collect()
        })
        .unwrap_or_default();
    let mut unknown_aps: BTreeSet<&str> = BTreeSet::new();

    for record in records {
        *clients_by_ssid.entry(record.ssid.clone()).or_default() += 1;
        *clients_by_protocol
            .entry(normalize_protocol(&record.protocol).to_string())
            .or_default() += 1;

        if ap_names.is_none() {
            continue;
        }

        match clients_by_access_point.get_mut(&record.ap_mac) {
            Some(ap) => ap.clients += 1,
            None => {
                unknown_aps.insert(record.ap_mac.as_str());
            }
        }
    }

    for mac in unknown_aps {
        warn!(ap_mac = %mac, cycle, "client references unknown access point, skipped for per-AP count");
    }

    AggregatedSnapshot {
        cycle,
        generated_at: Some(generated_at),
        clients_by_ssid,
        clients_by_protocol,
        clients_by_access_point,
    }
}
