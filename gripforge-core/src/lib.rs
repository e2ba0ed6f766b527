//! # Gripforge Core
//!
//! The protocol and state library for the Gripforge bridge.
//! Reframes the dynamometer's serial byte stream into telemetry lines,
//! validates them, and holds the live session state that API handlers poll.
//! No I/O lives here; the serial link layer drives these pieces.

pub mod framing;
pub mod parser;
pub mod state;

// Re-export the main types so users can just use `gripforge_core::GripStore`
pub use framing::LineDecoder;
pub use parser::{parse_reading, ParseError};
pub use state::{GripStore, Side, SideChangePolicy, Snapshot};

use serde::{Deserialize, Serialize};

/// One validated telemetry frame from the dynamometer: the instantaneous
/// force and the device's own running maximum, in the device's unit (lbs).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub current: f64,
    pub max: f64,
}
