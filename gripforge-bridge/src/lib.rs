//! # Gripforge Bridge
//!
//! The headless daemon that wires the serial link to consumers, plus the
//! collaborator surface a web layer mounts on top of it.

pub mod config;
pub mod session;

pub use config::BridgeConfig;
pub use session::SessionController;
