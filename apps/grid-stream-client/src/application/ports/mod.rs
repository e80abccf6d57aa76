//! Port Interfaces
//!
//! Defines the interfaces (ports) between the streaming core and the systems
//! around it, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `GridView`: The presentation layer that owns row data. Only ever called
//!   from the single consumer context.
//! - `BatchTrigger`: Schedules one consumption pass on that consumer context.

use crate::domain::grid::{GridRow, RowError};

/// Presentation-side owner of the grid rows.
///
/// Implementations are driven exclusively by the consumer loop, so they need
/// no internal synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait GridView: Send {
    /// Replace every row with a freshly loaded snapshot.
    fn replace_all_rows(&mut self, rows: Vec<GridRow>);

    /// Number of rows currently held.
    fn row_count(&self) -> usize;

    /// Mutate a single field of the row at `row_index`.
    ///
    /// # Errors
    ///
    /// Returns a `RowError` when the field name or value is invalid.
    fn update_row_field(
        &mut self,
        row_index: usize,
        field: &str,
        value: &str,
    ) -> Result<(), RowError>;

    /// Show a status line.
    fn notify_status(&mut self, text: &str);

    /// The streaming session has stopped.
    fn notify_streaming_stopped(&mut self);

    /// A transport failure was reported.
    fn notify_error(&mut self, message: &str);

    /// A batch finished applying `applied` field updates.
    fn on_batch_applied(&mut self, _applied: usize) {}
}

/// Requests a consumption pass on the single consumer context.
#[cfg_attr(test, mockall::automock)]
pub trait BatchTrigger: Send + Sync {
    /// Enqueue one pass.
    ///
    /// Returns `false` if the consumer is no longer running.
    fn request_pass(&self) -> bool;
}
