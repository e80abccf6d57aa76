//! Consumer Dispatch
//!
//! Serializes every interaction with the [`GridView`] onto one task.
//!
//! Producers (the stream reader, the scheduler's trigger) hold a cloneable
//! [`ViewHandle`] and post [`ConsumerCommand`]s; the [`GridConsumer`] owns the
//! view and executes them in order. Batch passes are bounded to one queued
//! command by the scheduler's admission flag, so the queue is unbounded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BatchTrigger, GridView};
use crate::application::services::UpdateScheduler;
use crate::domain::grid::GridRow;

/// Work item for the consumer task.
#[derive(Debug)]
pub enum ConsumerCommand {
    /// Drain and apply pending updates.
    ProcessBatch,
    /// Replace all rows with a snapshot.
    ReplaceRows(Vec<GridRow>),
    /// Show a status line.
    Status(String),
    /// The streaming session stopped.
    StreamingStopped,
    /// A transport failure was reported.
    Error(String),
}

/// Create a connected handle and command queue.
#[must_use]
pub fn channel() -> (ViewHandle, mpsc::UnboundedReceiver<ConsumerCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ViewHandle { tx }, rx)
}

/// Producer-side handle to the consumer task.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    tx: mpsc::UnboundedSender<ConsumerCommand>,
}

impl ViewHandle {
    /// Deliver a freshly loaded snapshot.
    pub fn replace_all_rows(&self, rows: Vec<GridRow>) {
        self.send(ConsumerCommand::ReplaceRows(rows));
    }

    /// Show a status line.
    pub fn notify_status(&self, text: impl Into<String>) {
        self.send(ConsumerCommand::Status(text.into()));
    }

    /// Report that streaming stopped.
    pub fn notify_streaming_stopped(&self) {
        self.send(ConsumerCommand::StreamingStopped);
    }

    /// Report a transport failure.
    pub fn notify_error(&self, message: impl Into<String>) {
        self.send(ConsumerCommand::Error(message.into()));
    }

    /// Whether the consumer task has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: ConsumerCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Grid consumer stopped, dropping command");
        }
    }
}

impl BatchTrigger for ViewHandle {
    fn request_pass(&self) -> bool {
        self.tx.send(ConsumerCommand::ProcessBatch).is_ok()
    }
}

/// Single consumer that owns the view.
pub struct GridConsumer<V: GridView> {
    view: V,
    scheduler: Arc<UpdateScheduler>,
    commands: mpsc::UnboundedReceiver<ConsumerCommand>,
    cancel: CancellationToken,
}

impl<V: GridView> GridConsumer<V> {
    /// Create a consumer.
    #[must_use]
    pub const fn new(
        view: V,
        scheduler: Arc<UpdateScheduler>,
        commands: mpsc::UnboundedReceiver<ConsumerCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            view,
            scheduler,
            commands,
            cancel,
        }
    }

    /// Run until cancelled or every handle is dropped, then return the view.
    ///
    /// Queued commands are drained before cancellation is observed.
    pub async fn run(mut self) -> V {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All view handles dropped, consumer exiting");
                        break;
                    };
                    self.handle(command);
                }
                () = self.cancel.cancelled() => {
                    tracing::debug!("Grid consumer cancelled");
                    break;
                }
            }
        }
        self.view
    }

    fn handle(&mut self, command: ConsumerCommand) {
        match command {
            ConsumerCommand::ProcessBatch => {
                if let Some(outcome) = self.scheduler.process_pending(&mut self.view) {
                    tracing::trace!(
                        drained = outcome.drained,
                        applied = outcome.applied,
                        skipped = outcome.skipped,
                        "Batch applied"
                    );
                }
            }
            ConsumerCommand::ReplaceRows(rows) => {
                let count = rows.len();
                self.view.replace_all_rows(rows);
                tracing::info!(rows = count, "Loaded snapshot into grid");
            }
            ConsumerCommand::Status(text) => self.view.notify_status(&text),
            ConsumerCommand::StreamingStopped => self.view.notify_streaming_stopped(),
            ConsumerCommand::Error(message) => self.view.notify_error(&message),
        }
    }
}
