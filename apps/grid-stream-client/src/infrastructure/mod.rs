//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Grid stream TCP client, codec and liveness monitoring.
pub mod grid;

/// Single-consumer command queue that drives the grid view.
pub mod dispatch;

/// In-memory grid view.
pub mod view;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
