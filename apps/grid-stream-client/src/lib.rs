#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Grid Stream Client - Coalescing Grid Feed Consumer
//!
//! Connects to a line-oriented grid server, loads the row snapshot, then
//! streams per-cell updates. Updates are coalesced per `(row, field)` in a
//! lock-free double buffer and applied in batches by a single consumer.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Row model and session types
//!   - `grid`: `GridRow`, `GridField`, typed field updates
//!   - `session`: Connection state and lifecycle events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `GridView` and `BatchTrigger`
//!   - `services`: Update coalescing scheduler and throughput reporting
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `grid`: TCP stream client, line codec, liveness monitor
//!   - `dispatch`: Consumer command queue
//!   - `view`: In-memory grid table
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! grid server ──lines──► GridStreamClient ──snapshot/status──────────┐
//!                              │                                     ▼
//!                              └─updates─► UpdateScheduler ─pass─► GridConsumer ─► GridView
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Row model and session types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::grid::{GridField, GridRow, RowError, RowId};
pub use domain::session::{ConnectionState, SessionEvent};

// Ports and services
pub use application::ports::{BatchTrigger, GridView};
pub use application::services::{
    BatchOutcome, SchedulerConfig, ThroughputReporter, ThroughputSnapshot, UpdateScheduler,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, GridConfig, SchedulerSettings, ServerSettings, StreamSettings,
};

// Stream client
pub use infrastructure::grid::{
    GridStreamClient, GridStreamClientConfig, LineCodec, LivenessConfig, ProtocolStatsSnapshot,
    StreamClientError,
};

// Consumer and view
pub use infrastructure::dispatch::{ConsumerCommand, GridConsumer, ViewHandle};
pub use infrastructure::view::{GridTable, GridTableStats};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
