//! Fieldbook - booking lifecycle service for a sports-club site
//!
//! Owns the reservation state machine (pending / confirmed / cancelled /
//! expired), wall-clock expiry sweeps and the day-indexed calendar
//! aggregation, served over a small HTTP API.
//!
//! Module structure:
//! - `domain/` - Core business types (BookingRecord, status, errors)
//! - `services/` - Business logic (store, lifecycle, expiry, calendar)
//! - `io/` - HTTP API and Prometheus exposition
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use fieldbook::infra::{Config, Metrics};
use fieldbook::io::http::{start_http_server, AppState};
use fieldbook::services::{
    BookingStore, CalendarAggregator, ExpirySweeper, LifecycleController, MemoryStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fieldbook - sports-club booking lifecycle service
#[derive(Parser, Debug)]
#[command(name = "fieldbook", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full request visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "fieldbook starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_port = %config.http_port(),
        snapshot_file = %config.snapshot_file().unwrap_or("<memory>"),
        ops_timeout_ms = %config.ops_timeout_ms(),
        scheduler_enabled = %config.scheduler_enabled(),
        scheduler_interval_secs = %config.scheduler_interval_secs(),
        auto_confirm_days = %config.auto_confirm_days(),
        fields = %config.field_catalog().len(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Build the store, with snapshot persistence when configured
    let store: Arc<dyn BookingStore> = match config.snapshot_file() {
        Some(path) => Arc::new(MemoryStore::with_snapshot(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let metrics = Arc::new(Metrics::new());
    let deadline = Duration::from_millis(config.ops_timeout_ms());
    let lifecycle = Arc::new(LifecycleController::new(store.clone(), metrics.clone(), deadline));
    let sweeper = Arc::new(ExpirySweeper::new(
        store.clone(),
        lifecycle.clone(),
        metrics.clone(),
        deadline,
    ));
    let calendar = Arc::new(CalendarAggregator::new(store.clone(), deadline));
    let config = Arc::new(config);

    // Periodic scheduler: sweep overdue bookings and apply tacit-consent
    // confirmation. The core only defines these as callable; this task
    // is the external trigger.
    if config.scheduler_enabled() {
        let sweeper = sweeper.clone();
        let lifecycle = lifecycle.clone();
        let config = config.clone();
        let mut scheduler_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                config.scheduler_interval_secs(),
            ));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = chrono::Local::now().naive_local();
                        match sweeper.sweep(now).await {
                            Ok(report) if report.updated > 0 => {
                                info!(updated = report.updated, "scheduled_sweep");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "scheduled_sweep_failed"),
                        }
                        if let Err(e) = lifecycle
                            .auto_confirm_stale(chrono::Utc::now(), config.auto_confirm_days())
                            .await
                        {
                            error!(error = %e, "scheduled_auto_confirm_failed");
                        }
                    }
                    _ = scheduler_shutdown.changed() => {
                        if *scheduler_shutdown.borrow() {
                            info!("scheduler_shutdown");
                            return;
                        }
                    }
                }
            }
        });
    }

    // Periodic metrics summary log
    {
        let metrics = metrics.clone();
        let store = store.clone();
        let interval_secs = config.metrics_interval_secs();
        let mut metrics_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let records = store.list().await.map(|r| r.len()).unwrap_or(0);
                        metrics.report(records).log();
                    }
                    _ = metrics_shutdown.changed() => {
                        if *metrics_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let state = AppState::new(store, lifecycle, sweeper, calendar, metrics, config.clone());
    start_http_server(config.http_port(), state, shutdown_rx).await?;

    info!("fieldbook shutdown complete");
    Ok(())
}
