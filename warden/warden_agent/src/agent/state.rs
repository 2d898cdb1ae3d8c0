//! Agent lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an [`Agent`](super::Agent).
///
/// ```text
/// init -> created -> current -> active <-> mechinterrupting
///                    current -> interrupting
/// (any but dead) -> deactivating -> active
/// (any) -> dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Connected, no mechanism instance yet.
    #[default]
    Init,

    /// The mechanism instance exists.
    Created,

    /// An invocation is in flight.
    Current,

    /// The last invocation finished.
    Active,

    /// An interrupt arrived while idle; the next run is skipped.
    MechInterrupting,

    /// An interrupt arrived during an invocation, or the agent itself
    /// requested one.
    Interrupting,

    /// A deactivation is in flight.
    Deactivating,

    /// Terminal.
    Dead,
}

impl AgentState {
    /// Apply an interrupt notice.
    ///
    /// # Returns
    ///
    /// The next state, and whether an `INTERRUPT` must be sent to the
    /// agent process.
    pub fn on_interrupt_notice(self) -> (Self, bool) {
        match self {
            Self::Current => (Self::Interrupting, true),
            Self::Active => (Self::MechInterrupting, false),
            other => (other, false),
        }
    }

    /// Apply an interrupt clear.
    pub fn on_interrupt_cleared(self) -> Self {
        match self {
            Self::MechInterrupting => Self::Active,
            other => other,
        }
    }

    /// Whether a run request is skipped in this state.
    pub fn skips_run(&self) -> bool {
        matches!(self, Self::MechInterrupting | Self::Dead)
    }

    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// State name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Created => "created",
            Self::Current => "current",
            Self::Active => "active",
            Self::MechInterrupting => "mechinterrupting",
            Self::Interrupting => "interrupting",
            Self::Deactivating => "deactivating",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
