use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use gripforge_bridge::config::BridgeConfig;
use gripforge_bridge::session::SessionController;
use gripforge_core::GripStore;
use gripforge_io::{LinkEvent, LinkManager};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(Path::new(&path))?,
        None => BridgeConfig::default(),
    };
    tracing::info!(port = %config.port, baud = config.baud, "gripforge bridge starting");

    let store = GripStore::with_policy(config.side_change);
    let (link, mut events) = LinkManager::start(config.link_config(), store.clone());
    let stats = link.stats();
    let controller = SessionController::new(store, link);

    // Map link events onto the log. The web layer would subscribe here too.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Connected(port) => tracing::info!(%port, "device connected"),
                LinkEvent::Disconnected(port) => tracing::warn!(%port, "device disconnected"),
                LinkEvent::ParseRejected { line, reason } => {
                    tracing::debug!(%line, %reason, "dropped line")
                }
                LinkEvent::ResetComplete => tracing::debug!("device reset acknowledged"),
                LinkEvent::Error(message) => tracing::warn!(%message, "link error"),
            }
        }
    });

    // Periodic status line, and a clean exit on ctrl-c.
    let mut status = tokio::time::interval(Duration::from_secs(
        config.status_interval_secs.max(1),
    ));
    loop {
        tokio::select! {
            _ = status.tick() => {
                let snap = controller.snapshot();
                tracing::info!(
                    current = snap.current,
                    max = snap.max,
                    user = %snap.user,
                    side = %snap.side,
                    frames = stats.frames(),
                    rejects = stats.rejects(),
                    "status"
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    tracing::info!("shutting down");
    controller.shutdown().await;
    Ok(())
}
