//! Status Endpoint
//!
//! Small HTTP surface over the running client: session state, the loaded grid,
//! coalescing throughput and Prometheus metrics.
//!
//! | Route      | Body                                       |
//! |------------|--------------------------------------------|
//! | `/health`  | JSON [`HealthResponse`]                    |
//! | `/healthz` | `OK` while the process is up               |
//! | `/readyz`  | `READY` while a session is streaming       |
//! | `/metrics` | Prometheus text exposition                 |
//!
//! A streaming session whose backlog sits above the scheduler's warning
//! threshold reports `degraded`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ThroughputTotals, UpdateScheduler};
use crate::domain::session::ConnectionState;
use crate::infrastructure::grid::{GridStreamClient, ProtocolStatsSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::view::GridTableStats;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors from the status endpoint.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listener could not be bound.
    #[error("cannot listen on port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("status endpoint failed: {0}")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Response Body
// =============================================================================

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the endpoint state was built.
    pub uptime_secs: u64,
    /// Wall clock at response time.
    pub current_time: DateTime<Utc>,
    /// Session summary.
    pub connection: ConnectionInfo,
    /// Grid summary.
    pub grid: GridInfo,
    /// Coalescing counters.
    pub throughput: ThroughputInfo,
    /// Anomalies seen by the current or most recent session.
    pub protocol: ProtocolStatsSnapshot,
}

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming with the backlog under control.
    Healthy,
    /// Session in transition, or applying updates is falling behind.
    Degraded,
    /// No live session.
    Unhealthy,
}

impl HealthStatus {
    /// Classify a session state and the scheduler backlog.
    #[must_use]
    pub const fn assess(state: ConnectionState, backlog: usize, backlog_limit: usize) -> Self {
        match state {
            ConnectionState::Streaming if backlog <= backlog_limit => Self::Healthy,
            state if state.is_active() => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Session summary.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// `ConnectionState` in lowercase.
    pub state: String,
    /// Whether the running flag is set.
    pub streaming: bool,
}

/// Grid summary.
#[derive(Debug, Clone, Serialize)]
pub struct GridInfo {
    /// Rows in the last delivered snapshot.
    pub rows: usize,
    /// Last status text pushed to the view.
    pub status: String,
    /// Field updates the view has applied.
    pub updates_applied: u64,
    /// Last error shown by the view.
    pub last_error: Option<String>,
}

/// Cumulative counters plus the live backlog.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputInfo {
    /// Totals since start.
    #[serde(flatten)]
    pub totals: ThroughputTotals,
    /// Distinct cells waiting in the live buffer.
    pub backlog: usize,
}

// =============================================================================
// Server
// =============================================================================

/// Handles the endpoint reads from.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: Arc<GridStreamClient>,
    scheduler: Arc<UpdateScheduler>,
    grid: Arc<GridTableStats>,
}

impl HealthServerState {
    /// Bundle the handles.
    #[must_use]
    pub fn new(
        version: String,
        client: Arc<GridStreamClient>,
        scheduler: Arc<UpdateScheduler>,
        grid: Arc<GridTableStats>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            client,
            scheduler,
            grid,
        }
    }

    fn report(&self) -> HealthResponse {
        let state = self.client.state();
        let backlog = self.scheduler.backlog();
        let backlog_limit = self.scheduler.config().backlog_warn_threshold;

        HealthResponse {
            status: HealthStatus::assess(state, backlog, backlog_limit),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            connection: ConnectionInfo {
                state: state.to_string(),
                streaming: self.client.is_streaming(),
            },
            grid: GridInfo {
                rows: self.grid.rows(),
                status: self.grid.status(),
                updates_applied: self.grid.updates_applied(),
                last_error: self.grid.last_error(),
            },
            throughput: ThroughputInfo {
                totals: self.scheduler.metrics().totals(),
                backlog,
            },
            protocol: self.client.protocol_stats(),
        }
    }
}

/// Status endpoint bound to one port.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Serve `state` on `port` until `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// [`HealthServerError::Bind`] if the port is unavailable,
    /// [`HealthServerError::Serve`] if the server fails afterwards.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Status endpoint listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!(port, "Status endpoint stopped");
        Ok(())
    }
}

/// Routes of the status endpoint.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(ready))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn ready(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.client.state() {
        ConnectionState::Streaming => "READY".into_response(),
        other => (StatusCode::SERVICE_UNAVAILABLE, format!("NOT READY ({other})")).into_response(),
    }
}

async fn prometheus() -> Response {
    match get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
