//! Process introspection.
//!
//! The engine needs to know a few facts about the process requesting a
//! right and about the process that created the authorization token: who
//! it runs as, whether it is signed by the platform, which entitlements
//! it holds and whether its sandbox lets it ask for a right at all.

use crate::types::Uid;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Facts about a process taking part in an authorization.
///
/// # Examples
///
/// ```
/// use warden_core::traits::{ProcessInfo, StaticProcess};
///
/// let process = StaticProcess {
///     pid: 42,
///     uid: 501,
///     path: "/usr/bin/tool".into(),
///     entitled_rights: vec!["system.preferences".into()],
///     ..StaticProcess::default()
/// };
///
/// assert!(process.has_entitlement_for_right("system.preferences"));
/// assert!(!process.has_entitlement_for_right("system.privilege.admin"));
/// assert!(process.sandbox_allows_right("system.privilege.admin"));
/// ```
pub trait ProcessInfo: Send + Sync + Debug {
    /// The process id.
    fn pid(&self) -> i32;

    /// The effective user id.
    fn uid(&self) -> Uid;

    /// The executable path.
    fn path(&self) -> &str;

    /// Whether the executable is signed by the platform.
    fn is_platform_signed(&self) -> bool;

    /// Whether the process holds a boolean entitlement.
    fn has_entitlement(&self, entitlement: &str) -> bool;

    /// Whether the process is entitled to the given right by name.
    fn has_entitlement_for_right(&self, right: &str) -> bool;

    /// Whether the process sandbox permits requesting `right`.
    fn sandbox_allows_right(&self, _right: &str) -> bool {
        true
    }

    /// The audit session the process belongs to.
    fn audit_session_id(&self) -> u32;
}

/// A process description fixed at construction.
///
/// Used for in-process callers, tests and policy files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticProcess {
    /// The process id.
    pub pid: i32,

    /// The effective user id.
    pub uid: Uid,

    /// The executable path.
    pub path: String,

    /// Whether the executable is platform signed.
    pub platform_signed: bool,

    /// Boolean entitlements held.
    pub entitlements: Vec<String>,

    /// Rights the process is entitled to by name.
    pub entitled_rights: Vec<String>,

    /// Rights the sandbox forbids requesting.
    pub sandbox_denied_rights: Vec<String>,

    /// Audit session id.
    pub audit_session_id: u32,
}

impl ProcessInfo for StaticProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn uid(&self) -> Uid {
        self.uid
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_platform_signed(&self) -> bool {
        self.platform_signed
    }

    fn has_entitlement(&self, entitlement: &str) -> bool {
        self.entitlements.iter().any(|e| e == entitlement)
    }

    fn has_entitlement_for_right(&self, right: &str) -> bool {
        self.entitled_rights.iter().any(|r| r == right)
    }

    fn sandbox_allows_right(&self, right: &str) -> bool {
        !self.sandbox_denied_rights.iter().any(|r| r == right)
    }

    fn audit_session_id(&self) -> u32 {
        self.audit_session_id
    }
}
