use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wlc_core::{ExporterConfig, HttpBridge, RefreshStats, Refresher, SnapshotStore};

mod exporter;

#[derive(Debug, Parser)]
#[command(name = "wlc-exporterd")]
#[command(about = "Wireless LAN controller client-count exporter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, default_value = "wlc-exporter.toml")]
    config: String,

    #[arg(long)]
    interval_secs: Option<u64>,

    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the controller and serve /metrics (default).
    Serve,
    /// Run one refresh cycle and print the result.
    Once {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = ExporterConfig::load(&cli.config)?;
    if let Some(interval_secs) = cli.interval_secs {
        config.interval_secs = interval_secs;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    config.validate()?;

    info!(
        controller = %config.controller,
        bridge = %config.bridge_url,
        interval_secs = config.interval_secs,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => exporter::run_exporter(&config).await?,
        Command::Once { format } => run_once(&config, format).await?,
    }

    Ok(())
}

async fn run_once(config: &ExporterConfig, format: OutputFormat) -> Result<()> {
    let bridge = HttpBridge::from_config(config).context("failed to set up bridge client")?;
    let mut refresher = Refresher::from_config(
        bridge,
        config,
        Arc::new(SnapshotStore::new()),
        Arc::new(RefreshStats::new()),
    );

    let snapshot = refresher.run_cycle().await.context("refresh cycle failed")?;

    match format {
        OutputFormat::Text => print!("{}", exporter::render_snapshot(&snapshot)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*snapshot)?),
    }

    Ok(())
}
