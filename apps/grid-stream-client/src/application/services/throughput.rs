//! Throughput Metrics
//!
//! Rolling counters fed by the coalescing scheduler, and the 1 Hz reporter
//! that logs and resets them. Reporting is observational: nothing here feeds
//! back into scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::coalescing::UpdateScheduler;
use crate::infrastructure::metrics;

// =============================================================================
// Aggregator
// =============================================================================

/// Counters owned by one scheduler.
///
/// Window counters are reset by [`ThroughputMetrics::take_window`]; totals
/// only ever grow.
#[derive(Debug)]
pub struct ThroughputMetrics {
    received: AtomicU64,
    coalesced: AtomicU64,
    applied: AtomicU64,
    batches: AtomicU64,
    batches_with_coalescing: AtomicU64,
    total_received: AtomicU64,
    total_applied: AtomicU64,
    total_coalesced: AtomicU64,
    slow_batches: AtomicU64,
    window_started: Mutex<Instant>,
}

impl Default for ThroughputMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            batches_with_coalescing: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            total_applied: AtomicU64::new(0),
            total_coalesced: AtomicU64::new(0),
            slow_batches: AtomicU64::new(0),
            window_started: Mutex::new(Instant::now()),
        }
    }

    /// Count one submitted update.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.total_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_update_received();
    }

    /// Count one update that replaced a pending value for the same cell.
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
        self.total_coalesced.fetch_add(1, Ordering::Relaxed);
        metrics::record_update_coalesced();
    }

    /// Count one drained batch.
    pub fn record_batch(&self, had_coalescing: bool, applied: usize, elapsed: Duration) {
        let applied = applied as u64;
        self.batches.fetch_add(1, Ordering::Relaxed);
        if had_coalescing {
            self.batches_with_coalescing.fetch_add(1, Ordering::Relaxed);
        }
        self.applied.fetch_add(applied, Ordering::Relaxed);
        self.total_applied.fetch_add(applied, Ordering::Relaxed);
        metrics::record_batch(applied, elapsed);
    }

    /// Count one slow batch. Returns the cumulative slow-batch count.
    pub fn record_slow_batch(&self) -> u64 {
        metrics::record_slow_batch();
        self.slow_batches.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Take the current window's counts and reset them.
    pub fn take_window(&self, backlog: usize) -> ThroughputSnapshot {
        let window = {
            let mut started = self.window_started.lock();
            let elapsed = started.elapsed();
            *started = Instant::now();
            elapsed
        };

        let received = self.received.swap(0, Ordering::Relaxed);
        let coalesced = self.coalesced.swap(0, Ordering::Relaxed);
        let applied = self.applied.swap(0, Ordering::Relaxed);
        let batches = self.batches.swap(0, Ordering::Relaxed);
        let batches_with_coalescing = self.batches_with_coalescing.swap(0, Ordering::Relaxed);

        ThroughputSnapshot {
            window,
            updates_received: received,
            updates_applied: applied,
            coalesced,
            coalescing_rate_pct: percent(coalesced, received),
            batches,
            batches_with_coalescing,
            batch_coalescing_rate_pct: percent(batches_with_coalescing, batches),
            backlog,
            slow_batches_total: self.slow_batches.load(Ordering::Relaxed),
        }
    }

    /// Cumulative totals since creation.
    #[must_use]
    pub fn totals(&self) -> ThroughputTotals {
        ThroughputTotals {
            updates_received: self.total_received.load(Ordering::Relaxed),
            updates_applied: self.total_applied.load(Ordering::Relaxed),
            coalesced: self.total_coalesced.load(Ordering::Relaxed),
            slow_batches: self.slow_batches.load(Ordering::Relaxed),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// One reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputSnapshot {
    /// Length of the window.
    #[serde(skip)]
    pub window: Duration,
    /// Updates submitted during the window.
    pub updates_received: u64,
    /// Field updates applied to the row model.
    pub updates_applied: u64,
    /// Updates that replaced a pending value.
    pub coalesced: u64,
    /// `coalesced / updates_received` as a percentage.
    pub coalescing_rate_pct: f64,
    /// Batches drained.
    pub batches: u64,
    /// Batches that contained at least one coalescing event.
    pub batches_with_coalescing: u64,
    /// `batches_with_coalescing / batches` as a percentage.
    pub batch_coalescing_rate_pct: f64,
    /// Distinct cells waiting in the live buffer.
    pub backlog: usize,
    /// Slow batches since start.
    pub slow_batches_total: u64,
}

impl ThroughputSnapshot {
    /// Submitted updates per second over the window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn updates_per_sec(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs > 0.0 {
            self.updates_received as f64 / secs
        } else {
            0.0
        }
    }
}

/// Cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ThroughputTotals {
    /// Updates submitted.
    pub updates_received: u64,
    /// Field updates applied.
    pub updates_applied: u64,
    /// Updates coalesced away.
    pub coalesced: u64,
    /// Slow batches.
    pub slow_batches: u64,
}

// =============================================================================
// Reporter
// =============================================================================

/// Periodically logs and resets the scheduler's window counters.
pub struct ThroughputReporter {
    scheduler: Arc<UpdateScheduler>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ThroughputReporter {
    /// Create a reporter.
    #[must_use]
    pub const fn new(
        scheduler: Arc<UpdateScheduler>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            interval,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Throughput reporter cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    fn report(&self) {
        let backlog = self.scheduler.backlog();
        let snapshot = self.scheduler.metrics().take_window(backlog);
        metrics::set_backlog(backlog);

        tracing::info!(
            updates_per_sec = format_args!("{:.0}", snapshot.updates_per_sec()),
            processed = snapshot.updates_applied,
            coalesced = snapshot.coalesced,
            coalescing_rate_pct = format_args!("{:.1}", snapshot.coalescing_rate_pct),
            batches = snapshot.batches,
            batches_with_coalescing = snapshot.batches_with_coalescing,
            batch_coalescing_rate_pct = format_args!("{:.1}", snapshot.batch_coalescing_rate_pct),
            buffered = snapshot.backlog,
            slow_batches = snapshot.slow_batches_total,
            "Grid update throughput"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_window_resets_counters() {
        let metrics = ThroughputMetrics::new();
        for _ in 0..4 {
            metrics.record_received();
        }
        metrics.record_coalesced();
        metrics.record_batch(true, 3, Duration::from_micros(10));
        metrics.record_batch(false, 0, Duration::from_micros(10));

        let snapshot = metrics.take_window(7);
        assert_eq!(snapshot.updates_received, 4);
        assert_eq!(snapshot.updates_applied, 3);
        assert_eq!(snapshot.coalesced, 1);
        assert!((snapshot.coalescing_rate_pct - 25.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.batches, 2);
        assert_eq!(snapshot.batches_with_coalescing, 1);
        assert!((snapshot.batch_coalescing_rate_pct - 50.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.backlog, 7);

        let next = metrics.take_window(0);
        assert_eq!(next.updates_received, 0);
        assert_eq!(next.batches, 0);
        assert!(next.coalescing_rate_pct.abs() < f64::EPSILON);
    }

    #[test]
    fn totals_survive_window_reset() {
        let metrics = ThroughputMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_coalesced();
        metrics.record_batch(true, 1, Duration::ZERO);
        let _ = metrics.take_window(0);

        let totals = metrics.totals();
        assert_eq!(totals.updates_received, 2);
        assert_eq!(totals.updates_applied, 1);
        assert_eq!(totals.coalesced, 1);
    }

    #[test]
    fn slow_batches_are_cumulative() {
        let metrics = ThroughputMetrics::new();
        assert_eq!(metrics.record_slow_batch(), 1);
        assert_eq!(metrics.record_slow_batch(), 2);
        let _ = metrics.take_window(0);
        assert_eq!(metrics.take_window(0).slow_batches_total, 2);
    }

    #[test]
    fn updates_per_sec_uses_window_length() {
        let snapshot = ThroughputSnapshot {
            window: Duration::from_millis(500),
            updates_received: 100,
            updates_applied: 0,
            coalesced: 0,
            coalescing_rate_pct: 0.0,
            batches: 0,
            batches_with_coalescing: 0,
            batch_coalescing_rate_pct: 0.0,
            backlog: 0,
            slow_batches_total: 0,
        };
        assert!((snapshot.updates_per_sec() - 200.0).abs() < 1e-9);
    }
}
