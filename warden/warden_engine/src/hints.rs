//! Names of the hints, context items and environment keys exchanged with
//! agents and callers.

use serde::{Deserialize, Serialize};
use std::fmt;

// Immutable hints, fixed for the whole request.

/// Pid of the requesting process.
pub const CLIENT_PID: &str = "client-pid";
/// Uid of the requesting process.
pub const CLIENT_UID: &str = "client-uid";
/// Executable path of the requesting process.
pub const CLIENT_PATH: &str = "client-path";
/// Whether the requesting process is platform signed.
pub const CLIENT_SIGNED: &str = "client-signed";
/// Pid of the process that created the token.
pub const CREATOR_PID: &str = "creator-pid";
/// Executable path of the process that created the token.
pub const CREATOR_PATH: &str = "creator-path";

// Temporary hints, removed after each right.

/// The right being evaluated.
pub const AUTHORIZE_RIGHT: &str = "authorize-right";
/// The rule the right resolved to.
pub const AUTHORIZE_RULE: &str = "authorize-rule";
/// The rule's description.
pub const RULE_DESCRIPTION: &str = "rule-description";

// Evaluation hints.

/// Number of authentication attempts made so far.
pub const TRIES: &str = "tries";
/// Why the previous attempt failed; a [`RetryReason`].
pub const REASON: &str = "reason";
/// Group the authenticating user must belong to.
pub const REQUIRE_USER_IN_GROUP: &str = "require-user-in-group";
/// Only a password may be offered, no other factor.
pub const PASSWORD_ONLY: &str = "password-only";

// Context items and environment keys.

/// Uid established by an authentication mechanism.
pub const CONTEXT_UID: &str = "uid";
/// Account name.
pub const USERNAME: &str = "username";
/// Account password.
pub const PASSWORD: &str = "password";
/// Passed credentials may be shared session-wide.
pub const SHARED: &str = "shared";

// Entitlements.

/// Lets the caller extract the password typed during authorization.
pub const EXTRACT_PASSWORD_ENTITLEMENT: &str = "warden.extract-password";
/// Marks a VPN configuration client.
pub const VPN_ENTITLEMENT: &str = "warden.networking.vpn-configuration";

/// Why an authentication round is being repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryReason {
    /// First attempt.
    #[default]
    None,
    /// No specific reason.
    Unknown,
    /// The password was wrong.
    InvalidPassphrase,
    /// The user is not in the required group.
    UserNotInGroup,
    /// The user is not acceptable for this rule.
    UnacceptableUser,
    /// The tries budget is exhausted.
    TooManyTries,
    /// An earlier step was interrupted and the chain restarted.
    WorldChanged,
}

impl RetryReason {
    /// Hint value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unknown => "unknown",
            Self::InvalidPassphrase => "invalid-passphrase",
            Self::UserNotInGroup => "user-not-in-group",
            Self::UnacceptableUser => "unacceptable-user",
            Self::TooManyTries => "too-many-tries",
            Self::WorldChanged => "world-changed",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
