//! Prometheus Metrics Module
//!
//! Exposes grid client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Updates**: Received, coalesced and applied cell updates
//! - **Batches**: Pass count, duration and slow passes
//! - **Connection**: Session state and lifecycle events
//! - **Protocol**: Malformed or unexpected server lines
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::session::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the already installed handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Update counters
    describe_counter!(
        "grid_client_updates_received_total",
        "Total cell updates received from the grid stream"
    );
    describe_counter!(
        "grid_client_updates_coalesced_total",
        "Total cell updates replaced by a newer value before being applied"
    );
    describe_counter!(
        "grid_client_updates_applied_total",
        "Total cell updates applied to the row model"
    );

    // Batch metrics
    describe_counter!("grid_client_batches_total", "Total consumption passes");
    describe_counter!(
        "grid_client_slow_batches_total",
        "Consumption passes exceeding the slow batch threshold"
    );
    describe_histogram!(
        "grid_client_batch_duration_seconds",
        "Time to drain and apply one batch"
    );
    describe_gauge!(
        "grid_client_pending_updates",
        "Distinct cells waiting in the live buffer"
    );

    // Connection
    describe_gauge!(
        "grid_client_connection_state",
        "Session state (0=idle 1=connecting 2=streaming 3=disconnecting 4=disconnected 5=errored)"
    );
    describe_counter!(
        "grid_client_session_events_total",
        "Session lifecycle events by type"
    );

    // Protocol
    describe_counter!(
        "grid_client_protocol_anomalies_total",
        "Malformed or unexpected server lines by kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for protocol anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Snapshot row that failed to decode.
    MalformedRow,
    /// Update line that failed to decode.
    MalformedUpdate,
    /// `ERROR:` line received during the snapshot.
    SnapshotError,
    /// Line with no meaning in the current phase.
    IgnoredLine,
}

impl AnomalyKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRow => "malformed_row",
            Self::MalformedUpdate => "malformed_update",
            Self::SnapshotError => "snapshot_error",
            Self::IgnoredLine => "ignored_line",
        }
    }
}

/// Record one update submitted to the scheduler.
pub fn record_update_received() {
    counter!("grid_client_updates_received_total").increment(1);
}

/// Record one update that replaced a pending value.
pub fn record_update_coalesced() {
    counter!("grid_client_updates_coalesced_total").increment(1);
}

/// Record a completed consumption pass.
pub fn record_batch(applied: u64, elapsed: Duration) {
    counter!("grid_client_batches_total").increment(1);
    counter!("grid_client_updates_applied_total").increment(applied);
    histogram!("grid_client_batch_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a pass that exceeded the slow batch threshold.
pub fn record_slow_batch() {
    counter!("grid_client_slow_batches_total").increment(1);
}

/// Update the pending update gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_backlog(pending: usize) {
    gauge!("grid_client_pending_updates").set(pending as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("grid_client_connection_state").set(state.as_gauge());
}

/// Record a session lifecycle event.
pub fn record_session_event(event: &'static str) {
    counter!("grid_client_session_events_total", "event" => event).increment(1);
}

/// Record a protocol anomaly.
pub fn record_protocol_anomaly(kind: AnomalyKind) {
    counter!(
        "grid_client_protocol_anomalies_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_kind_as_str() {
        assert_eq!(AnomalyKind::MalformedRow.as_str(), "malformed_row");
        assert_eq!(AnomalyKind::MalformedUpdate.as_str(), "malformed_update");
        assert_eq!(AnomalyKind::SnapshotError.as_str(), "snapshot_error");
        assert_eq!(AnomalyKind::IgnoredLine.as_str(), "ignored_line");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_update_received();
        record_batch(3, Duration::from_millis(1));
        set_backlog(10);
        set_connection_state(ConnectionState::Streaming);
        record_protocol_anomaly(AnomalyKind::IgnoredLine);
    }
}
