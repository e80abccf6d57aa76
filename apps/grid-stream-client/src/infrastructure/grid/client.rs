//! Grid Stream Client
//!
//! Owns one streaming session at a time against the grid server.
//!
//! # Session Tasks
//!
//! ```text
//! start_streaming ──spawn──► reader task ──rows/status──► ViewHandle
//!        │                        │ └────updates───────► UpdateScheduler
//!        │                        └──events──────────► SessionEvent channel
//!        └────────spawn──► liveness task ──(timeout)──► request_stop
//! ```
//!
//! Both tasks share the session's `CancellationToken`. A caller stop clears
//! the running flag first, so the reader's teardown stays silent. A liveness
//! stop leaves it set, so the teardown reports an error and `Disconnected`.
//!
//! Lines are decoded lossily: invalid UTF-8 becomes U+FFFD and the line is
//! handled like any other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::LineCodec;
use super::liveness::{LivenessConfig, LivenessMonitor, LivenessOutcome, LivenessState};
use super::protocol::{ProtocolStats, ProtocolStatsSnapshot, STOP_STREAM, STREAM_GRID, ServerLine};
use crate::application::services::UpdateScheduler;
use crate::domain::grid::GridRow;
use crate::domain::session::{ConnectionState, SessionEvent};
use crate::infrastructure::dispatch::ViewHandle;
use crate::infrastructure::metrics::{self, AnomalyKind};

/// Upper bound on delivering the stop notice to the server.
const STOP_NOTICE_TIMEOUT: Duration = Duration::from_millis(500);

/// Initial capacity of the line buffer.
const LINE_CAPACITY: usize = 256;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// TCP connection could not be opened.
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// No data within the read timeout.
    #[error("connection timeout")]
    ReadTimeout,

    /// Socket error while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The liveness monitor saw no data within its timeout.
    #[error("heartbeat timeout after {0:.1?}")]
    LivenessLost(Duration),
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the client.
#[derive(Debug, Clone)]
pub struct GridStreamClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Maximum silence on the socket, also bounding the connect attempt.
    pub read_timeout: Duration,
    /// Liveness monitoring.
    pub liveness: LivenessConfig,
    /// Bounded wait for session tasks when stopping.
    pub join_timeout: Duration,
}

impl GridStreamClientConfig {
    /// Create configuration with default timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout: Duration::from_secs(30),
            liveness: LivenessConfig::default(),
            join_timeout: Duration::from_secs(2),
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            read_timeout: settings.read_timeout,
            liveness: LivenessConfig::from_settings(settings),
            join_timeout: settings.join_timeout,
        }
    }

    /// `host:port` of the server.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Session
// =============================================================================

/// State shared by the tasks of one session.
struct Session {
    id: Uuid,
    running: AtomicBool,
    state: RwLock<ConnectionState>,
    liveness: Arc<LivenessState>,
    liveness_lost: Mutex<Option<Duration>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    stats: ProtocolStats,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            running: AtomicBool::new(true),
            state: RwLock::new(ConnectionState::Idle),
            liveness: Arc::new(LivenessState::new()),
            liveness_lost: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            stats: ProtocolStats::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::set_connection_state(state);
    }

    /// Send the stop notice if connected, then cancel the session.
    ///
    /// Failure to deliver the notice is not an error.
    async fn request_stop(&self) {
        {
            let mut writer = self.writer.lock().await;
            if let Some(writer) = writer.as_mut() {
                let notice = format!("{STOP_STREAM}\n");
                match tokio::time::timeout(STOP_NOTICE_TIMEOUT, writer.write_all(notice.as_bytes()))
                    .await
                {
                    Ok(Ok(())) => tracing::debug!(session_id = %self.id, "Sent stop request"),
                    Ok(Err(e)) => {
                        tracing::debug!(session_id = %self.id, error = %e, "Could not send stop request");
                    }
                    Err(_) => {
                        tracing::debug!(session_id = %self.id, "Timed out sending stop request");
                    }
                }
            }
        }
        self.cancel.cancel();
    }

    async fn close_transport(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    session: Option<Arc<Session>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

// =============================================================================
// Client
// =============================================================================

/// Streaming client for the grid server.
pub struct GridStreamClient {
    config: GridStreamClientConfig,
    codec: LineCodec,
    scheduler: Arc<UpdateScheduler>,
    view: ViewHandle,
    events: mpsc::Sender<SessionEvent>,
    slot: Mutex<SessionSlot>,
}

impl fmt::Debug for GridStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridStreamClient")
            .field("addr", &self.config.addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl GridStreamClient {
    /// Create a client. Nothing happens until [`Self::start_streaming`].
    #[must_use]
    pub fn new(
        config: GridStreamClientConfig,
        scheduler: Arc<UpdateScheduler>,
        view: ViewHandle,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            codec: LineCodec::new(),
            scheduler,
            view,
            events,
            slot: Mutex::new(SessionSlot::default()),
        }
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.slot
            .lock()
            .session
            .as_ref()
            .is_some_and(|session| session.is_running())
    }

    /// State of the current or most recent session.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.slot
            .lock()
            .session
            .as_ref()
            .map_or(ConnectionState::Idle, |session| session.state())
    }

    /// Protocol anomaly counts of the current or most recent session.
    #[must_use]
    pub fn protocol_stats(&self) -> ProtocolStatsSnapshot {
        self.slot
            .lock()
            .session
            .as_ref()
            .map(|session| session.stats.snapshot())
            .unwrap_or_default()
    }

    /// Start a session in the background.
    ///
    /// No-op if a session is already running. Must be called from within a
    /// Tokio runtime.
    pub fn start_streaming(&self) {
        let mut slot = self.slot.lock();
        if slot.session.as_ref().is_some_and(|session| session.is_running()) {
            tracing::debug!("Streaming already active, ignoring start");
            return;
        }
        if self.view.is_closed() {
            tracing::warn!("Grid consumer has stopped, not starting stream");
            return;
        }

        let session = Arc::new(Session::new());
        let reader = SessionReader {
            config: self.config.clone(),
            codec: self.codec,
            scheduler: Arc::clone(&self.scheduler),
            view: self.view.clone(),
            events: self.events.clone(),
            session: Arc::clone(&session),
        };

        let reader_task = tokio::spawn(reader.run());
        let liveness_task = tokio::spawn(watch_liveness(self.config.liveness, Arc::clone(&session)));

        // Finished handles from a previous session are simply dropped.
        slot.tasks = vec![("reader", reader_task), ("liveness", liveness_task)];
        slot.session = Some(session);
    }

    /// Stop the current session and wait (bounded) for its tasks.
    ///
    /// Idempotent. A caller stop does not emit `Disconnected` or errors.
    pub async fn stop_streaming(&self) {
        let (session, tasks) = {
            let mut slot = self.slot.lock();
            (slot.session.clone(), std::mem::take(&mut slot.tasks))
        };
        let Some(session) = session else {
            return;
        };

        if session.running.swap(false, Ordering::SeqCst) {
            tracing::info!(session_id = %session.id, "Stopping grid stream");
            session.set_state(ConnectionState::Disconnecting);
        }
        session.request_stop().await;

        for (name, handle) in tasks {
            join_bounded(name, handle, self.config.join_timeout).await;
        }
    }
}

async fn join_bounded(name: &'static str, mut handle: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Session task failed"),
        Err(_) => {
            tracing::warn!(
                task = name,
                timeout_ms = limit.as_millis(),
                "Session task did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

async fn watch_liveness(config: LivenessConfig, session: Arc<Session>) {
    let monitor = LivenessMonitor::new(config, Arc::clone(&session.liveness), session.cancel.clone());
    if let LivenessOutcome::Lost { elapsed } = monitor.run().await {
        *session.liveness_lost.lock() = Some(elapsed);
        session.request_stop().await;
    }
}

// =============================================================================
// Reader Task
// =============================================================================

/// How the stream ended when no error occurred.
enum StreamEnd {
    /// The session was cancelled.
    Cancelled,
    /// The server closed the connection.
    PeerClosed,
}

struct Snapshot {
    rows: Vec<GridRow>,
    complete: bool,
}

struct SessionReader {
    config: GridStreamClientConfig,
    codec: LineCodec,
    scheduler: Arc<UpdateScheduler>,
    view: ViewHandle,
    events: mpsc::Sender<SessionEvent>,
    session: Arc<Session>,
}

/// Newline-delimited reader that tolerates invalid UTF-8.
struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl LineReader {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            buf: Vec::with_capacity(LINE_CAPACITY),
        }
    }

    /// Next line without its `\n` or `\r\n` terminator, `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        let line = String::from_utf8_lossy(&self.buf);
        if matches!(line, std::borrow::Cow::Owned(_)) {
            tracing::debug!(line = %line, "Replaced invalid UTF-8 in line");
        }
        Ok(Some(line.into_owned()))
    }
}

impl SessionReader {
    async fn run(self) {
        tracing::info!(
            session_id = %self.session.id,
            addr = %self.config.addr(),
            "Connecting to grid stream"
        );
        self.session.set_state(ConnectionState::Connecting);
        self.emit(SessionEvent::Connecting).await;

        let outcome = tokio::select! {
            () = self.session.cancel.cancelled() => Ok(StreamEnd::Cancelled),
            result = self.stream() => result,
        };

        self.session.close_transport().await;
        self.finish(outcome).await;
    }

    async fn stream(&self) -> Result<StreamEnd, StreamClientError> {
        let connect = TcpStream::connect(self.config.addr());
        let socket = tokio::time::timeout(self.config.read_timeout, connect)
            .await
            .map_err(|_| StreamClientError::ReadTimeout)?
            .map_err(StreamClientError::Connect)?;
        let _ = socket.set_nodelay(true);

        let (read_half, mut write_half) = socket.into_split();
        write_half
            .write_all(format!("{STREAM_GRID}\n").as_bytes())
            .await?;
        *self.session.writer.lock().await = Some(write_half);
        self.session.liveness.record_data();
        tracing::debug!(session_id = %self.session.id, "Requested grid stream");

        let mut lines = LineReader::new(read_half);

        // A truncated snapshot is still delivered and announced; the closed
        // stream then ends the session.
        let snapshot = self.load_snapshot(&mut lines).await?;
        self.view.replace_all_rows(snapshot.rows);
        self.session.set_state(ConnectionState::Streaming);
        self.view.notify_status("Streaming...");
        self.emit(SessionEvent::Connected).await;

        if !snapshot.complete {
            return Ok(StreamEnd::PeerClosed);
        }
        self.stream_updates(&mut lines).await
    }

    async fn next_line(&self, lines: &mut LineReader) -> Result<Option<String>, StreamClientError> {
        let line = tokio::time::timeout(self.config.read_timeout, lines.next_line())
            .await
            .map_err(|_| StreamClientError::ReadTimeout)??;
        if line.is_some() {
            self.session.liveness.record_data();
        }
        Ok(line)
    }

    /// Read rows until `END_GRID_DATA`.
    ///
    /// Lines before `ROW_COUNT` are ignored. Undecodable rows and `ERROR:`
    /// lines are logged and skipped.
    async fn load_snapshot(&self, lines: &mut LineReader) -> Result<Snapshot, StreamClientError> {
        let mut rows = Vec::new();
        let mut reading_rows = false;

        loop {
            let Some(line) = self.next_line(lines).await? else {
                tracing::warn!(
                    rows = rows.len(),
                    "Stream closed before end of snapshot"
                );
                return Ok(Snapshot {
                    rows,
                    complete: false,
                });
            };

            match ServerLine::classify(&line) {
                ServerLine::RowCount(Some(expected)) => {
                    tracing::info!(expected_rows = expected, "Loading grid snapshot");
                    reading_rows = true;
                }
                ServerLine::RowCount(None) => {
                    tracing::warn!(line = %line, "Unreadable row count, loading snapshot anyway");
                    reading_rows = true;
                }
                ServerLine::EndGridData => {
                    tracing::info!(rows = rows.len(), "Finished loading grid snapshot");
                    return Ok(Snapshot {
                        rows,
                        complete: true,
                    });
                }
                ServerLine::Error(message) if reading_rows => {
                    self.session.stats.record(AnomalyKind::SnapshotError);
                    tracing::warn!(server_message = message, "Server error during snapshot, skipping");
                }
                ServerLine::Heartbeat | ServerLine::StreamStarted => {}
                ServerLine::Data(_) | ServerLine::Update(_) if reading_rows => {
                    match self.codec.decode_row(&line) {
                        Ok(row) => rows.push(row),
                        Err(e) => {
                            self.session.stats.record(AnomalyKind::MalformedRow);
                            tracing::warn!(error = %e, line = %line, "Skipping malformed snapshot row");
                        }
                    }
                }
                _ => {
                    self.session.stats.record(AnomalyKind::IgnoredLine);
                    tracing::debug!(line = %line, "Ignoring line before row count");
                }
            }
        }
    }

    async fn stream_updates(&self, lines: &mut LineReader) -> Result<StreamEnd, StreamClientError> {
        while let Some(line) = self.next_line(lines).await? {
            match ServerLine::classify(&line) {
                ServerLine::Update(raw) => self.handle_update(raw),
                ServerLine::Heartbeat => tracing::trace!("Heartbeat"),
                ServerLine::StreamStarted => {
                    tracing::debug!(session_id = %self.session.id, "Server confirmed stream start");
                }
                _ => {
                    self.session.stats.record(AnomalyKind::IgnoredLine);
                    tracing::trace!(line = %line, "Ignoring unexpected line");
                }
            }
        }
        Ok(StreamEnd::PeerClosed)
    }

    fn handle_update(&self, raw: &str) {
        match self.codec.decode_update(raw) {
            Ok(update) => {
                self.scheduler
                    .submit_update(update.row_id, &update.field, update.value);
            }
            Err(e) => {
                self.session.stats.record(AnomalyKind::MalformedUpdate);
                tracing::debug!(error = %e, line = raw, "Discarding malformed update");
            }
        }
    }

    /// Release the session for a new start, then report how it ended.
    async fn finish(&self, outcome: Result<StreamEnd, StreamClientError>) {
        let session = &self.session;
        let still_running = session.running.swap(false, Ordering::SeqCst);

        let failure = match outcome {
            Err(e) => Some(e),
            Ok(StreamEnd::Cancelled) => (*session.liveness_lost.lock()).map(StreamClientError::LivenessLost),
            Ok(StreamEnd::PeerClosed) => {
                tracing::info!(session_id = %session.id, "Grid stream closed by server");
                None
            }
        };

        session.set_state(if still_running && failure.is_some() {
            ConnectionState::Errored
        } else {
            ConnectionState::Disconnected
        });
        session.cancel.cancel();

        tracing::info!(
            session_id = %session.id,
            state = %session.state(),
            "Grid stream session ended"
        );

        if !still_running {
            if let Some(error) = &failure {
                tracing::debug!(error = %error, "Session error during requested stop");
            }
            return;
        }

        // View commands are unbounded; events go out last and never block.
        let message = failure.as_ref().map(|error| self.report_failure(error));
        self.view.notify_streaming_stopped();
        if let Some(message) = message {
            self.emit_now(SessionEvent::Error(message));
        }
        self.emit_now(SessionEvent::Disconnected);
    }

    /// Log a session failure and show it on the view.
    ///
    /// A read timeout goes to the event channel only.
    fn report_failure(&self, error: &StreamClientError) -> String {
        let message = error.to_string();
        match error {
            StreamClientError::ReadTimeout => {
                tracing::warn!(session_id = %self.session.id, "Read timeout - no data received");
                return message;
            }
            StreamClientError::LivenessLost(_) => {
                tracing::warn!(session_id = %self.session.id, error = %error, "Grid stream went silent");
            }
            StreamClientError::Connect(_) | StreamClientError::Io(_) => {
                tracing::error!(session_id = %self.session.id, error = %error, "Grid stream failed");
            }
        }
        self.view.notify_error(message.as_str());
        message
    }

    fn emit_now(&self, event: SessionEvent) {
        metrics::record_session_event(event.kind());
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(event = event.kind(), "Session event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Session event receiver dropped");
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        metrics::record_session_event(event.kind());
        if self.events.send(event).await.is_err() {
            tracing::debug!("Session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let settings = crate::StreamSettings {
            host: "feed".to_string(),
            port: 9001,
            read_timeout: Duration::from_secs(7),
            liveness_interval: Duration::from_secs(2),
            join_timeout: Duration::from_millis(300),
        };
        let config = GridStreamClientConfig::from_settings(&settings);

        assert_eq!(config.addr(), "feed:9001");
        assert_eq!(config.liveness.timeout, Duration::from_secs(7));
        assert_eq!(config.liveness.check_interval, Duration::from_secs(2));
        assert_eq!(config.join_timeout, Duration::from_millis(300));
    }

    #[test]
    fn error_messages() {
        assert_eq!(StreamClientError::ReadTimeout.to_string(), "connection timeout");
        assert_eq!(
            StreamClientError::LivenessLost(Duration::from_millis(30_040)).to_string(),
            "heartbeat timeout after 30.0s"
        );
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let (view, _commands) = crate::infrastructure::dispatch::channel();
        let scheduler = Arc::new(UpdateScheduler::new(
            crate::application::services::SchedulerConfig::default(),
            view.clone(),
        ));
        let (events, _rx) = mpsc::channel(8);
        let client = GridStreamClient::new(
            GridStreamClientConfig::new("127.0.0.1", 1),
            scheduler,
            view,
            events,
        );

        client.stop_streaming().await;
        assert!(!client.is_streaming());
        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(client.protocol_stats(), ProtocolStatsSnapshot::default());
    }

    #[tokio::test]
    async fn start_is_refused_once_consumer_is_gone() {
        let (view, commands) = crate::infrastructure::dispatch::channel();
        let scheduler = Arc::new(UpdateScheduler::new(
            crate::application::services::SchedulerConfig::default(),
            view.clone(),
        ));
        let (events, mut rx) = mpsc::channel(8);
        let client = GridStreamClient::new(
            GridStreamClientConfig::new("127.0.0.1", 1),
            scheduler,
            view,
            events,
        );
        drop(commands);

        client.start_streaming();
        assert!(!client.is_streaming());
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(rx.try_recv().is_err());
    }
}
