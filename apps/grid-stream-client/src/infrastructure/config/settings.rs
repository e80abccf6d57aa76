//! Grid Client Configuration Settings
//!
//! Configuration types for the grid stream client, loaded from environment
//! variables.

use std::time::Duration;

/// Grid stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Stream server host.
    pub host: String,
    /// Stream server port.
    pub port: u16,
    /// Maximum silence on the socket before the session times out.
    pub read_timeout: Duration,
    /// How often the liveness monitor checks for incoming data.
    pub liveness_interval: Duration,
    /// Bounded wait for session tasks when stopping.
    pub join_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(10),
            join_timeout: Duration::from_millis(2000),
        }
    }
}

impl StreamSettings {
    /// `host:port` address of the stream server.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Update scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Pending cell count above which a backlog warning is logged.
    pub backlog_warn_threshold: usize,
    /// Pass duration above which a batch counts as slow.
    pub slow_batch_threshold: Duration,
    /// Interval of the throughput summary.
    pub report_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            backlog_warn_threshold: 100,
            slow_batch_threshold: Duration::from_millis(5),
            report_interval: Duration::from_millis(1000),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete grid client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridConfig {
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Update scheduler settings.
    pub scheduler: SchedulerSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl GridConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream address is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or the stream port is 0.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("GRID_STREAM_HOST").unwrap_or(defaults.stream.host);
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("GRID_STREAM_HOST".to_string()));
        }

        let port = parse_u16(&lookup, "GRID_STREAM_PORT", defaults.stream.port);
        if port == 0 {
            return Err(ConfigError::InvalidPort("GRID_STREAM_PORT".to_string()));
        }

        let stream = StreamSettings {
            host,
            port,
            read_timeout: parse_duration_secs(
                &lookup,
                "GRID_STREAM_READ_TIMEOUT_SECS",
                defaults.stream.read_timeout,
            ),
            liveness_interval: parse_duration_secs(
                &lookup,
                "GRID_STREAM_LIVENESS_INTERVAL_SECS",
                defaults.stream.liveness_interval,
            ),
            join_timeout: parse_duration_millis(
                &lookup,
                "GRID_STREAM_JOIN_TIMEOUT_MS",
                defaults.stream.join_timeout,
            ),
        };

        let scheduler = SchedulerSettings {
            backlog_warn_threshold: parse_usize(
                &lookup,
                "GRID_BACKLOG_WARN_THRESHOLD",
                defaults.scheduler.backlog_warn_threshold,
            ),
            slow_batch_threshold: parse_duration_millis(
                &lookup,
                "GRID_SLOW_BATCH_MS",
                defaults.scheduler.slow_batch_threshold,
            ),
            report_interval: parse_duration_millis(
                &lookup,
                "GRID_METRICS_REPORT_INTERVAL_MS",
                defaults.scheduler.report_interval,
            ),
        };

        let server = ServerSettings {
            health_port: parse_u16(&lookup, "GRID_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            stream,
            scheduler,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Port variable is 0.
    #[error("environment variable {0} must be a non-zero port")]
    InvalidPort(String),
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = GridConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, GridConfig::default());
        assert_eq!(config.stream.addr(), "localhost:8080");
        assert_eq!(config.stream.read_timeout, Duration::from_secs(30));
        assert_eq!(config.stream.liveness_interval, Duration::from_secs(10));
        assert_eq!(config.stream.join_timeout, Duration::from_secs(2));
        assert_eq!(config.scheduler.backlog_warn_threshold, 100);
        assert_eq!(
            config.scheduler.slow_batch_threshold,
            Duration::from_millis(5)
        );
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn overrides_from_lookup() {
        let config = GridConfig::from_lookup(lookup(&[
            ("GRID_STREAM_HOST", "feed.internal"),
            ("GRID_STREAM_PORT", "9000"),
            ("GRID_STREAM_READ_TIMEOUT_SECS", "5"),
            ("GRID_BACKLOG_WARN_THRESHOLD", "500"),
            ("GRID_SLOW_BATCH_MS", "20"),
            ("GRID_HEALTH_PORT", "0"),
        ]))
        .unwrap();

        assert_eq!(config.stream.addr(), "feed.internal:9000");
        assert_eq!(config.stream.read_timeout, Duration::from_secs(5));
        assert_eq!(config.scheduler.backlog_warn_threshold, 500);
        assert_eq!(
            config.scheduler.slow_batch_threshold,
            Duration::from_millis(20)
        );
        assert_eq!(config.server.health_port, 0);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = GridConfig::from_lookup(lookup(&[
            ("GRID_STREAM_PORT", "not-a-port"),
            ("GRID_STREAM_READ_TIMEOUT_SECS", "0"),
            ("GRID_SLOW_BATCH_MS", "-3"),
        ]))
        .unwrap();

        assert_eq!(config.stream.port, 8080);
        assert_eq!(config.stream.read_timeout, Duration::from_secs(30));
        assert_eq!(
            config.scheduler.slow_batch_threshold,
            Duration::from_millis(5)
        );
    }

    #[test]
    fn zero_millisecond_intervals_fall_back_to_defaults() {
        let config = GridConfig::from_lookup(lookup(&[
            ("GRID_METRICS_REPORT_INTERVAL_MS", "0"),
            ("GRID_STREAM_JOIN_TIMEOUT_MS", "0"),
            ("GRID_SLOW_BATCH_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.scheduler.report_interval, Duration::from_secs(1));
        assert_eq!(config.stream.join_timeout, Duration::from_secs(2));
        assert_eq!(
            config.scheduler.slow_batch_threshold,
            Duration::from_millis(5)
        );
    }

    #[test]
    fn zero_stream_port_is_rejected() {
        let err = GridConfig::from_lookup(lookup(&[("GRID_STREAM_PORT", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidPort("GRID_STREAM_PORT".to_string()));
    }

    #[test]
    fn empty_host_is_rejected() {
        let err = GridConfig::from_lookup(lookup(&[("GRID_STREAM_HOST", " ")])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyValue("GRID_STREAM_HOST".to_string()));
    }
}
