//! `omegad` — the Omega IoT device service daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omega_core::ServiceConfig;
use omega_devices::{mqtt, TelemetryIngest, TypeRegistry};
use omega_storage::{InstanceStore, RegistrationStore, ShareStore, TimeSeriesStore};

/// Expired unbound registrations are swept on this cadence. Expiry is
/// re-checked at claim time, so the sweep is housekeeping only.
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "omegad", version, about = "Omega IoT device service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the telemetry ingestion service.
    Serve {
        /// Path to the JSON configuration file.
        #[arg(long, default_value = "omega.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        ServiceConfig::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::warn!(path = %config_path.display(), "config file not found, using defaults");
        ServiceConfig::default()
    };

    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let registrations = Arc::new(
        RegistrationStore::open(data_dir.join("registrations.redb"))
            .context("opening registration store")?,
    );
    let instances = Arc::new(
        InstanceStore::open(data_dir.join("instances.redb")).context("opening instance store")?,
    );
    let _shares = Arc::new(
        ShareStore::open(data_dir.join("shares.redb")).context("opening share store")?,
    );
    let timeseries = Arc::new(
        TimeSeriesStore::open(data_dir.join("timeseries.redb"))
            .context("opening time-series store")?,
    );

    let registry = Arc::new(TypeRegistry::new());
    if let Some(path) = &config.device_types_file {
        let count = registry
            .load_from_file(path)
            .await
            .with_context(|| format!("loading device types from {}", path.display()))?;
        tracing::info!(count, path = %path.display(), "device types loaded");
    } else {
        tracing::warn!("no device_types_file configured, catalog is empty");
    }

    let ingest = Arc::new(TelemetryIngest::new(instances, timeseries));
    // Startup connection failure is fatal; runtime drops reconnect.
    let _client = mqtt::start(&config.mqtt, ingest)
        .await
        .context("connecting to mqtt broker")?;

    tokio::spawn(purge_loop(registrations));

    tracing::info!(version = omega_core::VERSION, "omegad running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

async fn purge_loop(registrations: Arc<RegistrationStore>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        interval.tick().await;
        let now = chrono::Utc::now().timestamp();
        match registrations.purge_expired(now) {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "purged expired registrations"),
            Err(e) => tracing::warn!("registration purge failed: {}", e),
        }
    }
}
