// gripforge-bridge/src/session.rs
//
// The collaborator surface. A web layer mounts on this: poll the snapshot,
// change who is squeezing, start fresh sessions. Grip data itself flows in
// underneath, from the link worker.

use std::sync::Arc;

use gripforge_core::{GripStore, Side, Snapshot};
use gripforge_io::{LinkError, LinkManager, LinkStats};

pub struct SessionController {
    store: GripStore,
    link: LinkManager,
}

impl SessionController {
    pub fn new(store: GripStore, link: LinkManager) -> Self {
        Self { store, link }
    }

    /// One consistent view of the live state.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Change the active user and side.
    ///
    /// When the store's policy starts a new session, the device is rebooted
    /// too, so its own accumulator restarts with ours. A link that happens
    /// to be down only costs a warning; the zeroed store is already
    /// correct, and the device will report fresh values once it is back.
    pub async fn set_meta(&self, user: &str, side: Side) -> bool {
        let new_session = self.store.set_meta(user, side);
        if new_session {
            if let Err(e) = self.link.reset().await {
                tracing::warn!("device reset skipped: {}", e);
            }
        }
        new_session
    }

    /// Explicit new-session request: reboot the device, which zeroes the
    /// session as the final step of the reset sequence. Falls back to a
    /// store-only zero when there is no device to reboot.
    pub async fn new_session(&self) -> Result<(), LinkError> {
        match self.link.reset().await {
            Ok(()) => Ok(()),
            Err(LinkError::NotConnected) | Err(LinkError::Closed) => {
                self.store.reset_session();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.link.stats()
    }

    pub async fn shutdown(&self) {
        self.link.shutdown().await;
    }
}
