//! Configuration Module
//!
//! Configuration loading for the grid stream client.

mod settings;

pub use settings::{ConfigError, GridConfig, SchedulerSettings, ServerSettings, StreamSettings};
