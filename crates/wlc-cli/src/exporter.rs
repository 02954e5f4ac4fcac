use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wlc_core::{AggregatedSnapshot, ExporterConfig, HttpBridge, RefreshStats, Refresher, SnapshotStore};

pub const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub stats: Arc<RefreshStats>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

async fn handle_root() -> &'static str {
    "wlc-exporter: metrics are served on /metrics\n"
}

async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render(&state.store.current(), &state.stats);
    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)], body)
}

/// Starts the refresh loop and serves `/metrics` until Ctrl-C, then stops
/// the loop before returning.
pub async fn run_exporter(config: &ExporterConfig) -> Result<()> {
    let bridge = HttpBridge::from_config(config).context("failed to set up bridge client")?;
    let state = AppState {
        store: Arc::new(SnapshotStore::new()),
        stats: Arc::new(RefreshStats::new()),
    };

    let refresher = Refresher::from_config(
        bridge,
        config,
        Arc::clone(&state.store),
        Arc::clone(&state.stats),
    );
    let refresh = refresher.spawn();

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            let _ = refresh.stop().await;
            return Err(err).with_context(|| format!("failed to bind {}", config.listen));
        }
    };
    info!(listen = %config.listen, "serving metrics on /metrics");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            warn!("received ctrl-c, stopping");
        })
        .await;

    if let Err(err) = refresh.stop().await {
        error!(error = %err, "refresh loop ended abnormally");
    }
    info!("exporter stopped");

    served.context("metrics server failed")
}

/// Client count series for one snapshot, one line per map entry.
pub fn render_snapshot(snapshot: &AggregatedSnapshot) -> String {
    let mut out = String::new();

    for (ssid, count) in &snapshot.clients_by_ssid {
        let _ = writeln!(out, "wlc_ssid_clients{{ssid=\"{}\"}} {}", escape_label_value(ssid), count);
    }

    for (proto, count) in &snapshot.clients_by_protocol {
        let _ = writeln!(out, "wlc_types{{proto=\"{}\"}} {}", escape_label_value(proto), count);
    }

    for (mac, ap) in &snapshot.clients_by_access_point {
        let _ = writeln!(
            out,
            "wlc_ap_clients{{mac=\"{}\", name=\"{}\"}} {}",
            escape_label_value(mac),
            escape_label_value(&ap.name),
            ap.clients
        );
    }

    out
}

pub fn render(snapshot: &AggregatedSnapshot, stats: &RefreshStats) -> String {
    let mut out = render_snapshot(snapshot);

    let _ = writeln!(out, "wlc_refresh_cycles_total{{result=\"ok\"}} {}", stats.cycles_ok());
    let _ = writeln!(out, "wlc_refresh_cycles_total{{result=\"error\"}} {}", stats.cycles_failed());

    if let Some(generated_at) = snapshot.generated_at {
        let _ = writeln!(out, "wlc_last_refresh_timestamp_seconds {}", generated_at.timestamp());
        let _ = writeln!(
            out,
            "wlc_last_refresh_duration_seconds {:.3}",
            stats.last_duration().as_secs_f64()
        );
    }

    out
}

pub(crate) fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}
