//! Grid Stream Client Binary
//!
//! Connects to a grid server, keeps an in-memory copy of the grid current,
//! and logs throughput once per reporting interval.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin grid-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `GRID_STREAM_HOST`: Server host (default: localhost)
//! - `GRID_STREAM_PORT`: Server port (default: 8080)
//! - `GRID_STREAM_READ_TIMEOUT_SECS`: Socket read timeout (default: 30)
//! - `GRID_STREAM_LIVENESS_INTERVAL_SECS`: Liveness check interval (default: 10)
//! - `GRID_STREAM_JOIN_TIMEOUT_MS`: Bounded wait on stop (default: 2000)
//! - `GRID_BACKLOG_WARN_THRESHOLD`: Pending cells before warning (default: 100)
//! - `GRID_SLOW_BATCH_MS`: Slow batch threshold (default: 5)
//! - `GRID_METRICS_REPORT_INTERVAL_MS`: Throughput summary interval (default: 1000)
//! - `GRID_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use grid_stream_client::infrastructure::dispatch;
use grid_stream_client::infrastructure::telemetry;
use grid_stream_client::{
    GridConfig, GridConsumer, GridStreamClient, GridStreamClientConfig, GridTable, HealthServer,
    HealthServerState, SchedulerConfig, SessionEvent, ThroughputReporter, UpdateScheduler,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded wait for the consumer to drain on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Grid Stream Client");

    let _metrics_handle = init_metrics()?;

    let config = GridConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Consumer side: the view and the single task that drives it
    let table = GridTable::new();
    let table_stats = table.stats();
    let (view_handle, commands) = dispatch::channel();
    let scheduler = Arc::new(UpdateScheduler::new(
        SchedulerConfig::from_settings(&config.scheduler),
        view_handle.clone(),
    ));
    let consumer = GridConsumer::new(
        table,
        Arc::clone(&scheduler),
        commands,
        shutdown_token.clone(),
    );
    let consumer_task = tokio::spawn(consumer.run());

    // Throughput summary
    let reporter = ThroughputReporter::new(
        Arc::clone(&scheduler),
        config.scheduler.report_interval,
        shutdown_token.clone(),
    );
    tokio::spawn(reporter.run());

    // Stream client
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);
    let client = Arc::new(GridStreamClient::new(
        GridStreamClientConfig::from_settings(&config.stream),
        Arc::clone(&scheduler),
        view_handle,
        event_tx,
    ));
    tokio::spawn(handle_session_events(event_rx));

    // Health server
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&client),
            Arc::clone(&scheduler),
            table_stats,
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    client.start_streaming();
    tracing::info!("Grid stream client ready");

    await_shutdown().await;

    client.stop_streaming().await;
    shutdown_token.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, consumer_task).await {
        Ok(Ok(table)) => tracing::info!(
            rows = table.rows().len(),
            status = table.status(),
            "Grid consumer stopped"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Grid consumer failed"),
        Err(_) => tracing::warn!("Grid consumer did not stop in time"),
    }

    let totals = scheduler.metrics().totals();
    tracing::info!(
        updates_received = totals.updates_received,
        updates_applied = totals.updates_applied,
        coalesced = totals.coalesced,
        slow_batches = totals.slow_batches,
        "Grid stream client stopped"
    );
    Ok(())
}

/// Log session lifecycle events.
async fn handle_session_events(mut rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Connecting => tracing::info!("Grid stream connecting"),
            SessionEvent::Connected => tracing::info!("Grid stream connected"),
            SessionEvent::Disconnected => tracing::warn!("Grid stream disconnected"),
            SessionEvent::Error(message) => {
                tracing::error!(error = %message, "Grid stream error");
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GridConfig) {
    tracing::info!(
        addr = %config.stream.addr(),
        read_timeout_secs = config.stream.read_timeout.as_secs(),
        liveness_interval_secs = config.stream.liveness_interval.as_secs(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        backlog_warn_threshold = config.scheduler.backlog_warn_threshold,
        slow_batch_ms = config.scheduler.slow_batch_threshold.as_millis(),
        report_interval_ms = config.scheduler.report_interval.as_millis(),
        "Scheduler settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
