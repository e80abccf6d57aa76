//! Application Services
//!
//! Services that sit between the stream reader and the grid view.
//!
//! - `coalescing`: Double-buffered, cell-keyed update coalescing
//! - `throughput`: Rolling counters and the 1 Hz throughput report

pub mod coalescing;
pub mod throughput;

pub use coalescing::{
    BatchOutcome, CellKey, PendingUpdate, SchedulerConfig, UpdateBuffer, UpdateScheduler,
};
pub use throughput::{ThroughputMetrics, ThroughputReporter, ThroughputSnapshot, ThroughputTotals};
