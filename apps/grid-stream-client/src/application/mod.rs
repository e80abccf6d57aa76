//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the update coalescing services and the port
//! interfaces through which they reach the grid view.

/// Port interfaces for the grid view and consumer scheduling.
pub mod ports;

/// Coalescing scheduler and throughput metrics.
pub mod services;
