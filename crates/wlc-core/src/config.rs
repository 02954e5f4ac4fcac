use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    #[serde(alias = "snmpbot")]
    pub bridge_url: String,
    pub community: String,
    #[serde(alias = "wlc")]
    pub controller: String,
    #[serde(default = "default_interval_secs", alias = "interval")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_query_ap_table")]
    pub query_ap_table: bool,
    #[serde(default)]
    pub access_point_names: Option<BTreeMap<String, String>>,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9111))
}

fn default_query_ap_table() -> bool {
    true
}

/// Where AP display names come from for the per-access-point dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPointLookup {
    /// Names from the config file; the controller's AP table is never queried.
    Static(BTreeMap<String, String>),
    /// Names fetched from the controller's AP table on every cycle.
    BridgeTable,
    Disabled,
}

impl ExporterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge_url.trim().is_empty() {
            bail!("bridge_url must not be empty");
        }
        if self.community.is_empty() {
            bail!("community must not be empty");
        }
        if self.controller.trim().is_empty() {
            bail!("controller must not be empty");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn access_point_lookup(&self) -> AccessPointLookup {
        match (&self.access_point_names, self.query_ap_table) {
            (Some(names), _) => AccessPointLookup::Static(names.clone()),
            (None, true) => AccessPointLookup::BridgeTable,
            (None, false) => AccessPointLookup::Disabled,
        }
    }
}
