//! Session and host state.

use crate::types::Uid;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// The security session a caller belongs to.
pub trait SessionInfo: Send + Sync + Debug {
    /// The uid of the user owning the session.
    fn owner_uid(&self) -> Uid;

    /// Whether the session can display UI.
    fn has_graphical_access(&self) -> bool;

    /// Whether the session is the login window session.
    fn is_login_window(&self) -> bool;

    /// Audit session id.
    fn audit_session_id(&self) -> u32;

    /// Record that the session owner authenticated.
    fn mark_authenticated(&self);
}

/// Host-wide modes.
pub trait HostEnvironment: Send + Sync + Debug {
    /// Whether the host is unlocking an encrypted volume or running
    /// recovery. No group data is available in this mode.
    fn in_volume_unlock_mode(&self) -> bool;

    /// Whether the host is in a restricted low-power state where
    /// non-privileged UI must not run.
    fn in_low_power_state(&self) -> bool;
}

/// A session description fixed at construction.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSession {
    /// Session owner uid.
    pub owner_uid: Uid,

    /// Whether UI is available.
    pub graphical: bool,

    /// Whether this is the login window session.
    pub login_window: bool,

    /// Audit session id.
    pub audit_session_id: u32,

    #[serde(skip)]
    authenticated: AtomicBool,
}

impl StaticSession {
    /// Create a graphical session owned by `owner_uid`.
    pub fn new(owner_uid: Uid) -> Self {
        Self {
            owner_uid,
            graphical: true,
            ..Self::default()
        }
    }

    /// Whether `mark_authenticated` has been called.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }
}

impl SessionInfo for StaticSession {
    fn owner_uid(&self) -> Uid {
        self.owner_uid
    }

    fn has_graphical_access(&self) -> bool {
        self.graphical
    }

    fn is_login_window(&self) -> bool {
        self.login_window
    }

    fn audit_session_id(&self) -> u32 {
        self.audit_session_id
    }

    fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }
}

/// Host modes fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticHost {
    /// Volume unlock / recovery mode.
    pub volume_unlock: bool,

    /// Restricted low-power state.
    pub low_power: bool,
}

impl HostEnvironment for StaticHost {
    fn in_volume_unlock_mode(&self) -> bool {
        self.volume_unlock
    }

    fn in_low_power_state(&self) -> bool {
        self.low_power
    }
}
