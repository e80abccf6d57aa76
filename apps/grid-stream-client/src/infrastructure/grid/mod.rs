//! Grid Stream Adapter
//!
//! TCP client for the line-oriented grid server: wire codec, protocol
//! control lines, liveness monitoring, and the session lifecycle.

pub mod client;
pub mod codec;
pub mod liveness;
pub mod protocol;

pub use client::{GridStreamClient, GridStreamClientConfig, StreamClientError};
pub use codec::{CodecError, LineCodec, UpdateLine};
pub use liveness::{LivenessConfig, LivenessMonitor, LivenessOutcome, LivenessState};
pub use protocol::{ProtocolStats, ProtocolStatsSnapshot, STOP_STREAM, STREAM_GRID, ServerLine};
