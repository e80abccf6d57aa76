//! Domain Layer - Core grid types and session lifecycle.
//!
//! This layer contains the row model and connection lifecycle types with no
//! I/O dependencies.

/// Fixed-schema grid rows and name-addressed field updates.
pub mod grid;

/// Connection state and session events.
pub mod session;
