//! Protocol message kinds.

use super::wire::{Attachments, WireItem};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_concurrency::Completer;
use warden_core::error::TransportError;
use warden_core::types::MechanismResult;

/// The agent host a mechanism runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentService {
    /// The UI agent of the caller's session.
    Regular,

    /// The UI agent of the login window session.
    LoginWindow,

    /// The privileged, UI-less agent host.
    Privileged,
}

impl AgentService {
    /// Choose the service for a mechanism.
    ///
    /// Privileged mechanisms always run in the privileged host; others run
    /// in the login window agent when the caller's session is the login
    /// window, and in the regular agent otherwise.
    pub fn select(privileged: bool, login_window_session: bool) -> Self {
        if privileged {
            Self::Privileged
        } else if login_window_session {
            Self::LoginWindow
        } else {
            Self::Regular
        }
    }

    /// The executable implementing this service.
    pub fn executable_name(&self) -> &'static str {
        match self {
            Self::Regular => "warden-agent",
            Self::LoginWindow => "warden-agent-loginwindow",
            Self::Privileged => "warden-authhost",
        }
    }
}

impl fmt::Display for AgentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Regular => "regular",
            Self::LoginWindow => "login-window",
            Self::Privileged => "privileged",
        };
        write!(f, "{}", name)
    }
}

/// Result code of a `CREATE` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateResult {
    /// The mechanism instance exists.
    Success,

    /// The service was interrupted; the request may be retried.
    ConnectionInterrupted,

    /// The mechanism could not be created.
    Failure,
}

/// A request sent to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Instantiate a mechanism.
    Create {
        /// Plugin name.
        plugin: String,
        /// Mechanism parameter.
        param: String,
        /// Audit session of the caller, if attached.
        audit_session: Option<u32>,
        /// Bootstrap namespace of the caller, if attached.
        bootstrap: Option<u64>,
    },

    /// Run the mechanism.
    Invoke {
        /// Hints visible to the mechanism.
        hints: Vec<WireItem>,
        /// Context gathered so far.
        context: Vec<WireItem>,
        /// Hints describing the caller, which the mechanism cannot change.
        immutable_hints: Vec<WireItem>,
    },

    /// Abort whatever the mechanism is showing.
    Interrupt,

    /// Put the mechanism to rest; it stays usable.
    Deactivate,

    /// Tear the mechanism down.
    Destroy,
}

impl AgentRequest {
    /// Message kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Invoke { .. } => "invoke",
            Self::Interrupt => "interrupt",
            Self::Deactivate => "deactivate",
            Self::Destroy => "destroy",
        }
    }

    /// Whether the request expects a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Invoke { .. } | Self::Deactivate
        )
    }
}

/// A reply from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentReply {
    /// Reply to `CREATE`.
    Create {
        /// Result code.
        result: CreateResult,
    },

    /// Reply to `INVOKE`.
    Invoke {
        /// Hints after the mechanism ran.
        hints: Vec<WireItem>,
        /// Context after the mechanism ran.
        context: Vec<WireItem>,
        /// Mechanism result.
        result: MechanismResult,
    },

    /// Reply to `DEACTIVATE`.
    Deactivate,
}

impl AgentReply {
    /// Message kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Invoke { .. } => "invoke",
            Self::Deactivate => "deactivate",
        }
    }
}

/// A request with its correlation id and out-of-band values.
pub struct OutboundMessage {
    /// Correlation id, echoed in the reply.
    pub id: u64,

    /// The request.
    pub request: AgentRequest,

    /// Out-of-band values referenced by the request.
    pub attachments: Attachments,
}

/// Something a transport received or observed.
pub enum InboundEvent {
    /// A reply to an earlier request.
    Reply {
        /// Correlation id of the request.
        id: u64,
        /// The reply.
        reply: AgentReply,
        /// Out-of-band values referenced by the reply.
        attachments: Attachments,
    },

    /// The agent asks the engine to interrupt the chain at this
    /// mechanism.
    InterruptRequested {
        /// Completed once the request has been applied, if present.
        applied: Option<Completer<()>>,
    },

    /// The transport failed.
    Failed(TransportError),
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply {
                id,
                reply,
                attachments,
            } => f
                .debug_struct("Reply")
                .field("id", id)
                .field("reply", reply)
                .field("attachments", &attachments.len())
                .finish(),
            Self::InterruptRequested { applied } => f
                .debug_struct("InterruptRequested")
                .field("acknowledged", &applied.is_some())
                .finish(),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}
