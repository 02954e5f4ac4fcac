use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ExporterConfig;

pub const CLIENT_TABLE: &str = "CISCO-LWAPP-DOT11-CLIENT-MIB::cldcClientTable";
pub const AP_TABLE: &str = "CISCO-LWAPP-AP-MIB::cLApTable";

/// One wireless client as reported in a single poll of the client table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub ssid: String,
    pub protocol: String,
    pub ap_mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointRecord {
    pub mac: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("bridge returned {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("unexpected payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BridgeError {
    pub fn url(&self) -> Option<&str> {
        match self {
            BridgeError::Client(_) => None,
            BridgeError::Request { url, .. }
            | BridgeError::Status { url, .. }
            | BridgeError::Decode { url, .. } => Some(url),
        }
    }
}

#[async_trait]
pub trait Bridge: Send + Sync {
    async fn client_table(&self) -> Result<Vec<AssociationRecord>, BridgeError>;
    async fn access_point_table(&self) -> Result<Vec<AccessPointRecord>, BridgeError>;
    fn endpoint(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct TableResponse<E> {
    #[serde(rename = "Entries")]
    entries: Vec<E>,
}

#[derive(Debug, Deserialize)]
struct ClientEntry {
    #[serde(rename = "Objects")]
    objects: ClientObjects,
}

#[derive(Debug, Deserialize)]
struct ClientObjects {
    #[serde(rename = "CISCO-LWAPP-DOT11-CLIENT-MIB::cldcClientSSID")]
    ssid: String,
    #[serde(rename = "CISCO-LWAPP-DOT11-CLIENT-MIB::cldcClientProtocol")]
    protocol: String,
    #[serde(rename = "CISCO-LWAPP-DOT11-CLIENT-MIB::cldcApMacAddress")]
    ap_mac: String,
}

#[derive(Debug, Deserialize)]
struct ApEntry {
    #[serde(rename = "Index")]
    index: ApIndex,
    #[serde(rename = "Objects")]
    objects: ApObjects,
}

#[derive(Debug, Deserialize)]
struct ApIndex {
    #[serde(rename = "CISCO-LWAPP-AP-MIB::cLApSysMacAddress")]
    mac: String,
}

#[derive(Debug, Deserialize)]
struct ApObjects {
    #[serde(rename = "CISCO-LWAPP-AP-MIB::cLApName")]
    name: String,
}

/// Parses a client-table document. Any entry missing one of the expected
/// objects fails the whole table.
pub fn parse_client_table(body: &str) -> Result<Vec<AssociationRecord>, serde_json::Error> {
    let table: TableResponse<ClientEntry> = serde_json::from_str(body)?;
    Ok(table
        .entries
        .into_iter()
        .map(|entry| AssociationRecord {
            ssid: entry.objects.ssid,
            protocol: entry.objects.protocol,
            ap_mac: entry.objects.ap_mac,
        })
        .collect())
}

pub fn parse_access_point_table(body: &str) -> Result<Vec<AccessPointRecord>, serde_json::Error> {
    let table: TableResponse<ApEntry> = serde_json::from_str(body)?;
    Ok(table
        .entries
        .into_iter()
        .map(|entry| AccessPointRecord {
            mac: entry.index.mac,
            name: entry.objects.name,
        })
        .collect())
}

pub struct HttpBridge {
    client: reqwest::Client,
    base_url: String,
    community: String,
    controller: String,
}

impl HttpBridge {
    pub fn new(
        base_url: impl Into<String>,
        community: impl Into<String>,
        controller: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BridgeError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            community: community.into(),
            controller: controller.into(),
        })
    }

    pub fn from_config(config: &ExporterConfig) -> Result<Self, BridgeError> {
        Self::new(
            config.bridge_url.clone(),
            config.community.clone(),
            config.controller.clone(),
            config.request_timeout(),
        )
    }

    pub fn table_url(&self, table: &str) -> String {
        format!(
            "{}/api/hosts/{}@{}/tables/{}",
            self.base_url, self.community, self.controller, table
        )
    }

    async fn fetch_table(&self, table: &str) -> Result<(String, String), BridgeError> {
        let url = self.table_url(table);
        debug!(%url, "fetching table");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| BridgeError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status { url, status });
        }

        let body = response.text().await.map_err(|source| BridgeError::Request {
            url: url.clone(),
            source,
        })?;

        Ok((url, body))
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    async fn client_table(&self) -> Result<Vec<AssociationRecord>, BridgeError> {
        let (url, body) = self.fetch_table(CLIENT_TABLE).await?;
        parse_client_table(&body).map_err(|source| BridgeError::Decode { url, source })
    }

    async fn access_point_table(&self) -> Result<Vec<AccessPointRecord>, BridgeError> {
        let (url, body) = self.fetch_table(AP_TABLE).await?;
        parse_access_point_table(&body).map_err(|source| BridgeError::Decode { url, source })
    }

    fn endpoint(&self) -> String {
        format!("{} via {}", self.controller, self.base_url)
    }
}
