//! Streaming Session Types
//!
//! Connection lifecycle state and the events a streaming session reports to
//! its owner.

use std::fmt;

/// Connection lifecycle of one streaming session.
///
/// ```text
/// Idle ─► Connecting ─► Streaming ─► (Disconnecting) ─► Disconnected
///              │             │
///              └─────────────┴────────► Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session has been started.
    #[default]
    Idle,
    /// Opening the transport and loading the snapshot.
    Connecting,
    /// Snapshot delivered, live updates flowing.
    Streaming,
    /// Caller-initiated stop in progress.
    Disconnecting,
    /// Session ended cleanly.
    Disconnected,
    /// Session ended after a transport or liveness failure.
    Errored,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Errored => "errored",
        }
    }

    /// Whether a session is currently active in this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming | Self::Disconnecting)
    }

    /// Numeric code used for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Streaming => 2.0,
            Self::Disconnecting => 3.0,
            Self::Disconnected => 4.0,
            Self::Errored => 5.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events emitted by the streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Opening the connection.
    Connecting,
    /// Snapshot loaded and live updates started.
    Connected,
    /// Session ended while it was still expected to run.
    Disconnected,
    /// Transport or liveness failure.
    Error(String),
}

impl SessionEvent {
    /// Event name, used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert!(!ConnectionState::Idle.is_active());
    }

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Streaming.is_active());
        assert!(ConnectionState::Disconnecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Errored.is_active());
    }

    #[test]
    fn event_kind() {
        assert_eq!(SessionEvent::Connected.kind(), "connected");
        assert_eq!(SessionEvent::Error("x".to_string()).kind(), "error");
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Streaming.to_string(), "streaming");
        assert_eq!(ConnectionState::Errored.to_string(), "errored");
    }
}
