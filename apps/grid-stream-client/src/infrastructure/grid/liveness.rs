//! Liveness Monitor
//!
//! The grid stream has no ping/pong: any line from the server counts as a
//! sign of life. The monitor wakes periodically and reports the session lost
//! once the silence exceeds the timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Configuration for liveness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Interval between checks.
    pub check_interval: Duration,
    /// Silence after which the session is considered dead.
    pub timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

impl LivenessConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(check_interval: Duration, timeout: Duration) -> Self {
        Self {
            check_interval,
            timeout,
        }
    }

    /// Create configuration from `StreamSettings`.
    ///
    /// The silence threshold is the socket read timeout.
    #[must_use]
    pub const fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            check_interval: settings.liveness_interval,
            timeout: settings.read_timeout,
        }
    }
}

/// Last-data timestamp shared between the reader and the monitor.
#[derive(Debug)]
pub struct LivenessState {
    last_data: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create new state, counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_data: RwLock::new(Instant::now()),
        }
    }

    /// Record that a line was received.
    pub fn record_data(&self) {
        *self.last_data.write() = Instant::now();
    }

    /// Get the time since the last received line.
    #[must_use]
    pub fn time_since_data(&self) -> Duration {
        self.last_data.read().elapsed()
    }
}

/// How a monitor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// The session was cancelled first.
    Cancelled,
    /// No data arrived within the timeout.
    Lost {
        /// Silence observed at the failing check.
        elapsed: Duration,
    },
}

/// Periodic liveness checker for one session.
pub struct LivenessMonitor {
    config: LivenessConfig,
    state: Arc<LivenessState>,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    /// Create a new liveness monitor.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        state: Arc<LivenessState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            cancel,
        }
    }

    /// Run until cancelled or liveness is lost.
    pub async fn run(self) -> LivenessOutcome {
        let start = tokio::time::Instant::now() + self.config.check_interval;
        let mut interval = tokio::time::interval_at(start, self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness monitor cancelled");
                    return LivenessOutcome::Cancelled;
                }
                _ = interval.tick() => {
                    let elapsed = self.state.time_since_data();
                    if elapsed > self.config.timeout {
                        tracing::warn!(
                            elapsed_ms = elapsed.as_millis(),
                            timeout_ms = self.config.timeout.as_millis(),
                            "Heartbeat timeout - no data received"
                        );
                        return LivenessOutcome::Lost { elapsed };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = LivenessConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn state_tracks_last_data() {
        let state = LivenessState::new();
        assert!(state.time_since_data() < Duration::from_millis(100));

        *state.last_data.write() = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap_or_else(Instant::now);
        assert!(state.time_since_data() >= Duration::from_secs(4));

        state.record_data();
        assert!(state.time_since_data() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn monitor_reports_lost_after_silence() {
        let state = Arc::new(LivenessState::new());
        *state.last_data.write() = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap_or_else(Instant::now);

        let monitor = LivenessMonitor::new(
            LivenessConfig::new(Duration::from_millis(10), Duration::from_secs(30)),
            state,
            CancellationToken::new(),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), monitor.run())
            .await
            .unwrap();
        assert!(matches!(outcome, LivenessOutcome::Lost { elapsed } if elapsed >= Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn monitor_stays_quiet_while_data_flows() {
        let state = Arc::new(LivenessState::new());
        let cancel = CancellationToken::new();
        let monitor = LivenessMonitor::new(
            LivenessConfig::new(Duration::from_millis(10), Duration::from_millis(200)),
            Arc::clone(&state),
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.record_data();
        }
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), LivenessOutcome::Cancelled);
    }
}
