//! Grid Stream Protocol
//!
//! Control lines exchanged with the grid server and the per-session counters
//! for lines that did not make sense.
//!
//! # Session Flow
//!
//! ```text
//! client: STREAM_GRID
//! server: ROW_COUNT:<n>
//! server: <row>            (n times, interleaved ERROR:<msg> possible)
//! server: END_GRID_DATA
//! server: STREAM_STARTED
//! server: UPDATE|..., HEARTBEAT ...
//! client: STOP_STREAM      (on stop)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::codec::UPDATE_PREFIX;
use crate::infrastructure::metrics::{self, AnomalyKind};

/// Request that opens the stream.
pub const STREAM_GRID: &str = "STREAM_GRID";

/// Request that ends the stream.
pub const STOP_STREAM: &str = "STOP_STREAM";

const ROW_COUNT_PREFIX: &str = "ROW_COUNT:";
const ERROR_PREFIX: &str = "ERROR:";
const END_GRID_DATA: &str = "END_GRID_DATA";
const STREAM_STARTED: &str = "STREAM_STARTED";
const HEARTBEAT: &str = "HEARTBEAT";

/// A line received from the server, classified by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLine<'a> {
    /// `ROW_COUNT:<n>`; `None` if the count is not a number.
    RowCount(Option<usize>),
    /// End of the snapshot.
    EndGridData,
    /// Live updates are starting.
    StreamStarted,
    /// Keep-alive.
    Heartbeat,
    /// `ERROR:<msg>`.
    Error(&'a str),
    /// `UPDATE|...`, kept whole for the codec.
    Update(&'a str),
    /// Anything else; a snapshot row while loading.
    Data(&'a str),
}

impl<'a> ServerLine<'a> {
    /// Classify one line (without its terminator).
    #[must_use]
    pub fn classify(line: &'a str) -> Self {
        if line.starts_with(UPDATE_PREFIX) {
            return Self::Update(line);
        }
        if let Some(count) = line.strip_prefix(ROW_COUNT_PREFIX) {
            return Self::RowCount(count.trim().parse().ok());
        }
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            return Self::Error(message);
        }
        match line {
            END_GRID_DATA => Self::EndGridData,
            STREAM_STARTED => Self::StreamStarted,
            HEARTBEAT => Self::Heartbeat,
            _ => Self::Data(line),
        }
    }
}

/// Counters for malformed or unexpected lines within one session.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    malformed_rows: AtomicU64,
    malformed_updates: AtomicU64,
    snapshot_errors: AtomicU64,
    ignored_lines: AtomicU64,
}

impl ProtocolStats {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            malformed_rows: AtomicU64::new(0),
            malformed_updates: AtomicU64::new(0),
            snapshot_errors: AtomicU64::new(0),
            ignored_lines: AtomicU64::new(0),
        }
    }

    /// Record one anomaly.
    pub fn record(&self, kind: AnomalyKind) {
        let counter = match kind {
            AnomalyKind::MalformedRow => &self.malformed_rows,
            AnomalyKind::MalformedUpdate => &self.malformed_updates,
            AnomalyKind::SnapshotError => &self.snapshot_errors,
            AnomalyKind::IgnoredLine => &self.ignored_lines,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_protocol_anomaly(kind);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> ProtocolStatsSnapshot {
        ProtocolStatsSnapshot {
            malformed_rows: self.malformed_rows.load(Ordering::Relaxed),
            malformed_updates: self.malformed_updates.load(Ordering::Relaxed),
            snapshot_errors: self.snapshot_errors.load(Ordering::Relaxed),
            ignored_lines: self.ignored_lines.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProtocolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStatsSnapshot {
    /// Snapshot rows that failed to decode.
    pub malformed_rows: u64,
    /// Update lines that failed to decode.
    pub malformed_updates: u64,
    /// `ERROR:` lines seen while loading the snapshot.
    pub snapshot_errors: u64,
    /// Lines with no meaning in their phase.
    pub ignored_lines: u64,
}
