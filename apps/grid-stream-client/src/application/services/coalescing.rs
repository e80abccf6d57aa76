//! Update Coalescing Scheduler
//!
//! Decouples the stream reader, which may deliver tens of thousands of cell
//! updates per second, from a consumer that applies them far less often.
//!
//! # Design
//!
//! Updates land in a live [`UpdateBuffer`] keyed by `(row, field)`. A newer
//! update for the same cell replaces the pending one, so the consumer only
//! ever applies the latest value. A consumption pass atomically swaps in a
//! fresh buffer and drains the old one.
//!
//! ```text
//! reader task ──submit_update──► live buffer ──swap──► drained batch ──► GridView
//!                    │                                      ▲
//!                    └── CAS(scheduled) ──► request_pass ───┘ (single consumer)
//! ```
//!
//! The `processing_scheduled` flag is the only admission control: at most
//! one pass is queued or running at any instant. It is cleared right after
//! the swap so that updates arriving mid-apply schedule a fresh pass.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use super::throughput::ThroughputMetrics;
use crate::application::ports::{BatchTrigger, GridView};
use crate::domain::grid::RowId;

// =============================================================================
// Buffer Types
// =============================================================================

/// Identity of a pending update: one grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    /// Target row.
    pub row_id: RowId,
    /// Target field wire name.
    pub field: String,
}

impl CellKey {
    /// Create a key.
    #[must_use]
    pub fn new(row_id: RowId, field: impl Into<String>) -> Self {
        Self {
            row_id,
            field: field.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row_id, self.field)
    }
}

/// A drained update, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Target cell.
    pub key: CellKey,
    /// Unescaped new value.
    pub value: String,
}

impl PendingUpdate {
    /// Consume a drained buffer into owned updates.
    pub fn drain(buffer: UpdateBuffer) -> impl Iterator<Item = Self> {
        buffer.into_iter().map(|(key, value)| Self { key, value })
    }
}

/// Cell-keyed pending values. Insertion order is irrelevant.
pub type UpdateBuffer = DashMap<CellKey, String>;

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Pending cell count above which a backlog warning is logged.
    pub backlog_warn_threshold: usize,
    /// Pass duration above which a batch counts as slow.
    pub slow_batch_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backlog_warn_threshold: 100,
            slow_batch_threshold: Duration::from_millis(5),
        }
    }
}

impl SchedulerConfig {
    /// Create configuration from `SchedulerSettings`.
    #[must_use]
    pub const fn from_settings(settings: &crate::SchedulerSettings) -> Self {
        Self {
            backlog_warn_threshold: settings.backlog_warn_threshold,
            slow_batch_threshold: settings.slow_batch_threshold,
        }
    }
}

/// Result of one consumption pass that drained a non-empty buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Distinct cells drained.
    pub drained: usize,
    /// Field updates applied to the view.
    pub applied: usize,
    /// Updates skipped (row out of bounds or invalid field/value).
    pub skipped: usize,
    /// Whether any update in this batch replaced an older one.
    pub had_coalescing: bool,
    /// Whether the view panicked part-way through.
    pub aborted: bool,
    /// Time spent in the pass.
    pub elapsed: Duration,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Lock-free double-buffered update coalescer.
pub struct UpdateScheduler {
    config: SchedulerConfig,
    live: ArcSwap<UpdateBuffer>,
    processing_scheduled: AtomicBool,
    batch_had_coalescing: AtomicBool,
    metrics: Arc<ThroughputMetrics>,
    trigger: Box<dyn BatchTrigger>,
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("config", &self.config)
            .field("backlog", &self.backlog())
            .field("processing_scheduled", &self.is_pass_scheduled())
            .finish_non_exhaustive()
    }
}

impl UpdateScheduler {
    /// Create a scheduler that requests passes through `trigger`.
    #[must_use]
    pub fn new(config: SchedulerConfig, trigger: impl BatchTrigger + 'static) -> Self {
        Self {
            config,
            live: ArcSwap::from_pointee(UpdateBuffer::new()),
            processing_scheduled: AtomicBool::new(false),
            batch_had_coalescing: AtomicBool::new(false),
            metrics: Arc::new(ThroughputMetrics::new()),
            trigger: Box::new(trigger),
        }
    }

    /// Tuning this scheduler was built with.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Shared handle to this scheduler's counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ThroughputMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Distinct cells waiting in the live buffer.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.live.load().len()
    }

    /// Whether a pass is currently queued or running.
    #[must_use]
    pub fn is_pass_scheduled(&self) -> bool {
        self.processing_scheduled.load(Ordering::Acquire)
    }

    /// Buffer one cell update. Called from the producer side.
    ///
    /// A pending update for the same cell is replaced and counted as
    /// coalesced.
    pub fn submit_update(&self, row_id: RowId, field: &str, value: String) {
        self.metrics.record_received();

        let pending = {
            let buffer = self.live.load();
            if buffer.insert(CellKey::new(row_id, field), value).is_some() {
                self.metrics.record_coalesced();
                self.batch_had_coalescing.store(true, Ordering::Release);
            }
            buffer.len()
        };

        if pending > self.config.backlog_warn_threshold {
            tracing::warn!(
                pending,
                threshold = self.config.backlog_warn_threshold,
                "Coalesced updates backing up in buffer"
            );
        }

        self.schedule_if_idle();
    }

    /// Request a pass unless one is already scheduled.
    ///
    /// Returns `true` if this call scheduled the pass.
    fn schedule_if_idle(&self) -> bool {
        if self
            .processing_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if self.trigger.request_pass() {
            true
        } else {
            self.processing_scheduled.store(false, Ordering::Release);
            tracing::debug!("Consumer gone, batch pass not scheduled");
            false
        }
    }

    /// Drain the live buffer and apply it to `view`.
    ///
    /// Must only be called from the single consumer context. Returns `None`
    /// when there was nothing to drain.
    pub fn process_pending(&self, view: &mut dyn GridView) -> Option<BatchOutcome> {
        let started = Instant::now();

        let had_coalescing = self.batch_had_coalescing.swap(false, Ordering::AcqRel);
        let drained = self.take_live_buffer();
        self.processing_scheduled.store(false, Ordering::Release);

        if drained.is_empty() {
            return None;
        }

        let batch_size = drained.len();
        let mut applied = 0;
        let mut skipped = 0;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            for update in PendingUpdate::drain(drained) {
                if apply_update(view, &update.key, &update.value) {
                    applied += 1;
                } else {
                    skipped += 1;
                }
            }
        }));

        let aborted = result.is_err();
        if aborted {
            tracing::error!(
                batch_size,
                applied,
                "Grid view panicked while applying batch, remaining updates dropped"
            );
            self.processing_scheduled.store(false, Ordering::Release);
        } else {
            view.on_batch_applied(applied);
        }

        let elapsed = started.elapsed();
        self.metrics.record_batch(had_coalescing, applied, elapsed);

        if elapsed > self.config.slow_batch_threshold {
            let slow_batches = self.metrics.record_slow_batch();
            tracing::info!(
                slow_batches,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                batch_size,
                "Slow batch"
            );
        }

        if !self.live.load().is_empty() {
            self.schedule_if_idle();
        }

        Some(BatchOutcome {
            drained: batch_size,
            applied,
            skipped,
            had_coalescing,
            aborted,
            elapsed,
        })
    }

    /// Publish a fresh buffer and take sole ownership of the old one.
    ///
    /// Producers hold a buffer reference only for the duration of one insert,
    /// so the wait is short. Inserts that land before the last reference is
    /// released are part of the drained batch.
    fn take_live_buffer(&self) -> UpdateBuffer {
        let mut drained = self.live.swap(Arc::new(UpdateBuffer::new()));
        loop {
            match Arc::try_unwrap(drained) {
                Ok(buffer) => return buffer,
                Err(shared) => {
                    drained = shared;
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Apply one update. Returns `false` if it was skipped.
fn apply_update(view: &mut dyn GridView, key: &CellKey, value: &str) -> bool {
    let row_index = key.row_id as usize;
    if row_index >= view.row_count() {
        tracing::trace!(cell = %key, "Update for row outside grid, skipping");
        return false;
    }

    match view.update_row_field(row_index, &key.field, value) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(cell = %key, error = %e, "Failed to apply update");
            false
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
