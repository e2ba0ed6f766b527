//! # Bridge Configuration
//!
//! One small TOML file configures the daemon. Every field is optional; the
//! defaults mirror the garage deployment (a NodeMCU on the first USB
//! adapter at 9600 baud).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use gripforge_core::SideChangePolicy;
use gripforge_io::LinkConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial device path.
    pub port: String,
    pub baud: u32,
    /// Worker poll interval in milliseconds.
    pub poll_ms: u64,
    /// Reset-line hold time in milliseconds.
    pub settle_ms: u64,
    /// Echo accepted readings back over the link.
    pub echo: bool,
    /// Reopen the port with backoff after transport errors.
    pub reconnect: bool,
    /// What switching hands does to the running session.
    pub side_change: SideChangePolicy,
    /// Seconds between status lines in the log.
    pub status_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            port: link.port,
            baud: link.baud,
            poll_ms: link.poll_interval.as_millis() as u64,
            settle_ms: link.settle_time.as_millis() as u64,
            echo: link.echo,
            reconnect: link.reconnect,
            side_change: SideChangePolicy::default(),
            status_interval_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// Read and parse the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            port: self.port.clone(),
            baud: self.baud,
            poll_interval: Duration::from_millis(self.poll_ms),
            settle_time: Duration::from_millis(self.settle_ms),
            echo: self.echo,
            reconnect: self.reconnect,
            ..LinkConfig::default()
        }
    }
}
