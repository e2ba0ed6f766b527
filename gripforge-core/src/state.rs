//! # Live Session State
//!
//! The one piece of state shared by design: the latest accepted reading,
//! the session maximum, and who is squeezing with which hand.
//! The ingest worker writes to it, any number of handler threads read from
//! it, and the Session Controller occasionally rewrites the metadata.
//! One lock guards the whole record, so a reader can never observe a
//! current/max pair torn across two updates.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::Reading;

/// Name shown until somebody claims the device.
pub const DEFAULT_USER: &str = "guest";

/// Which hand is on the dynamometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Default for Side {
    fn default() -> Self {
        Side::Right
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// What switching hands does to the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideChangePolicy {
    /// Changing hands starts a new session: zero both current and max.
    ResetBoth,
    /// Zero only the session max; the instantaneous value stands.
    ResetMax,
    /// Carry the session across sides.
    Keep,
}

impl Default for SideChangePolicy {
    fn default() -> Self {
        SideChangePolicy::ResetBoth
    }
}

/// One consistent view of the live state. What the web layer polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub current: f64,
    pub max: f64,
    pub user: String,
    pub side: Side,
}

#[derive(Debug)]
struct LiveState {
    current: f64,
    session_max: f64,
    user: String,
    side: Side,
}

impl LiveState {
    fn view(&self) -> Snapshot {
        Snapshot {
            current: self.current,
            max: self.session_max,
            user: self.user.clone(),
            side: self.side,
        }
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            current: 0.0,
            session_max: 0.0,
            user: DEFAULT_USER.to_string(),
            side: Side::default(),
        }
    }
}

/// Handle to the process-wide live state.
///
/// Cheap to clone; every clone points at the same record. All access goes
/// through these operations; no caller ever holds the fields directly.
#[derive(Debug, Clone)]
pub struct GripStore {
    inner: Arc<Mutex<LiveState>>,
    policy: SideChangePolicy,
}

impl GripStore {
    pub fn new() -> Self {
        Self::with_policy(SideChangePolicy::default())
    }

    pub fn with_policy(policy: SideChangePolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LiveState::default())),
            policy,
        }
    }

    pub fn policy(&self) -> SideChangePolicy {
        self.policy
    }

    /// A consistent view of all four fields at one instant.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().unwrap().view()
    }

    /// Record an accepted reading. The instantaneous value is replaced;
    /// the session max only ever rises. The device's own max field is the
    /// remote accumulator's opinion; the session max here is derived from
    /// what we actually observed, so a rebooting device cannot inject a
    /// stale high-water mark. Returns the post-update view.
    pub fn update(&self, reading: Reading) -> Snapshot {
        let mut state = self.inner.lock().unwrap();
        state.current = reading.current;
        if reading.current > state.session_max {
            state.session_max = reading.current;
        }
        state.view()
    }

    /// Change the active user and side. A side change applies the
    /// configured policy; returns true when that started a new session.
    pub fn set_meta(&self, user: &str, side: Side) -> bool {
        let user = user.trim();
        let mut state = self.inner.lock().unwrap();

        state.user = if user.is_empty() {
            DEFAULT_USER.to_string()
        } else {
            user.to_string()
        };

        if state.side == side {
            return false;
        }
        state.side = side;

        match self.policy {
            SideChangePolicy::ResetBoth => {
                state.current = 0.0;
                state.session_max = 0.0;
                tracing::info!(user = %state.user, side = %state.side, "side change, new session");
                true
            }
            SideChangePolicy::ResetMax => {
                state.session_max = 0.0;
                tracing::info!(user = %state.user, side = %state.side, "side change, max cleared");
                true
            }
            SideChangePolicy::Keep => false,
        }
    }

    /// Zero the session: both the instantaneous value and the max.
    pub fn reset_session(&self) {
        let mut state = self.inner.lock().unwrap();
        state.current = 0.0;
        state.session_max = 0.0;
        tracing::info!(user = %state.user, side = %state.side, "session reset");
    }
}

impl Default for GripStore {
    fn default() -> Self {
        Self::new()
    }
}
