//! Authorization outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of evaluating a right, a rule, or a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// The right is granted.
    Allow,

    /// Policy says no. Retryable within the tries budget.
    Deny,

    /// Granting would require prompting, which is not allowed.
    InteractionNotAllowed,

    /// The user or caller aborted. Never retried.
    Canceled,

    /// Evaluator or transport failure. Never retried.
    Internal,
}

impl AuthStatus {
    /// Whether this status ends an evaluation without further retries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Internal)
    }

    /// Whether this status grants the right.
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Get the name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::InteractionNotAllowed => "interaction-not-allowed",
            Self::Canceled => "canceled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The result reported by one mechanism step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismResult {
    /// The step succeeded.
    Allow,

    /// The step refused.
    Deny,

    /// The user dismissed the step.
    UserCanceled,

    /// No result has been produced.
    #[default]
    Undefined,
}

impl MechanismResult {
    /// Convert to the status an evaluation reports.
    pub fn into_status(self) -> AuthStatus {
        match self {
            Self::Allow => AuthStatus::Allow,
            Self::Deny => AuthStatus::Deny,
            Self::UserCanceled => AuthStatus::Canceled,
            Self::Undefined => AuthStatus::Internal,
        }
    }
}

impl From<MechanismResult> for AuthStatus {
    fn from(result: MechanismResult) -> Self {
        result.into_status()
    }
}

impl fmt::Display for MechanismResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::UserCanceled => "user-canceled",
            Self::Undefined => "undefined",
        };
        write!(f, "{}", name)
    }
}
