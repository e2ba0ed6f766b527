//! # Gripforge IO
//!
//! The hardware side of the bridge. Owns the serial port exclusively, runs
//! the ingest-or-reset worker, and publishes everything the rest of the
//! process needs to know about the link as events. The dynamometer is the
//! only writer on the wire; this crate is the only reader.

pub mod link;
pub mod port;

pub use link::{
    LinkCommand, LinkConfig, LinkError, LinkEvent, LinkManager, LinkSession, LinkState, LinkStats,
    SessionExit,
};
pub use port::{ByteSource, ResetSignal, SerialGripPort};
