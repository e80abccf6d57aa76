//! In-Memory Grid Table
//!
//! Headless [`GridView`] used by the binary. Holds the rows, the latest
//! status line, and publishes a few figures for the health endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::application::ports::GridView;
use crate::domain::grid::{GridRow, RowError};

/// Figures readable from outside the consumer task.
#[derive(Debug, Default)]
pub struct GridTableStats {
    rows: AtomicUsize,
    updates_applied: AtomicU64,
    status: RwLock<String>,
    last_error: RwLock<Option<String>>,
}

impl GridTableStats {
    /// Rows currently held.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }

    /// Field updates applied since creation.
    #[must_use]
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied.load(Ordering::Relaxed)
    }

    /// Latest status line.
    #[must_use]
    pub fn status(&self) -> String {
        self.status.read().clone()
    }

    /// Most recent error pushed to the view, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

/// Row model owned by the consumer task.
#[derive(Debug, Default)]
pub struct GridTable {
    rows: Vec<GridRow>,
    status: String,
    stats: Arc<GridTableStats>,
}

impl GridTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared figures for monitoring.
    #[must_use]
    pub fn stats(&self) -> Arc<GridTableStats> {
        Arc::clone(&self.stats)
    }

    /// Current rows.
    #[must_use]
    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// Latest status line.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    fn set_status(&mut self, text: String) {
        tracing::debug!(status = %text, "Grid status");
        self.stats.status.write().clone_from(&text);
        self.status = text;
    }
}

impl GridView for GridTable {
    fn replace_all_rows(&mut self, rows: Vec<GridRow>) {
        self.rows = rows;
        self.stats.rows.store(self.rows.len(), Ordering::Relaxed);
        self.set_status("Connected".to_string());
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn update_row_field(&mut self, row_index: usize, field: &str, value: &str) -> Result<(), RowError> {
        // Out-of-range indices are filtered before this is called.
        let Some(row) = self.rows.get_mut(row_index) else {
            return Ok(());
        };
        row.update_field(field, value)?;
        Ok(())
    }

    fn notify_status(&mut self, text: &str) {
        self.set_status(text.to_string());
    }

    fn notify_streaming_stopped(&mut self) {
        self.set_status("Disconnected".to_string());
    }

    fn notify_error(&mut self, message: &str) {
        *self.stats.last_error.write() = Some(message.to_string());
        self.set_status(format!("Error: {message}"));
    }

    fn on_batch_applied(&mut self, applied: usize) {
        self.stats
            .updates_applied
            .fetch_add(applied as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: u32) -> Vec<GridRow> {
        (0..n)
            .map(|id| GridRow {
                id,
                name: format!("ROW{id}"),
                ..GridRow::default()
            })
            .collect()
    }

    #[test]
    fn snapshot_replaces_rows_and_sets_status() {
        let mut table = GridTable::new();
        table.replace_all_rows(rows(3));
        table.replace_all_rows(rows(2));

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.status(), "Connected");
        assert_eq!(table.stats().rows(), 2);
        assert_eq!(table.stats().status(), "Connected");
    }

    #[test]
    fn update_changes_one_field() {
        let mut table = GridTable::new();
        table.replace_all_rows(rows(2));

        table.update_row_field(1, "price", "12.25").unwrap();
        assert_eq!(table.rows()[1].price, 12.25);
        assert_eq!(table.rows()[0].price, 0.0);
    }

    #[test]
    fn invalid_update_is_reported() {
        let mut table = GridTable::new();
        table.replace_all_rows(rows(1));

        assert!(table.update_row_field(0, "qty", "5").is_err());
        assert!(table.update_row_field(0, "quantity", "five").is_err());
        assert_eq!(table.rows()[0].quantity, 0);
    }

    #[test]
    fn status_texts() {
        let mut table = GridTable::new();
        table.notify_status("Streaming...");
        assert_eq!(table.status(), "Streaming...");

        table.notify_error("connection timeout");
        assert_eq!(table.status(), "Error: connection timeout");
        assert_eq!(
            table.stats().last_error().as_deref(),
            Some("connection timeout")
        );

        table.notify_streaming_stopped();
        assert_eq!(table.status(), "Disconnected");
    }

    #[test]
    fn applied_updates_accumulate() {
        let mut table = GridTable::new();
        table.on_batch_applied(3);
        table.on_batch_applied(4);
        assert_eq!(table.stats().updates_applied(), 7);
    }
}
