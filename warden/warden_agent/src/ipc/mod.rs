//! Agent IPC.
//!
//! The protocol has five message kinds. `CREATE`, `INVOKE` and
//! `DEACTIVATE` expect a reply correlated by request id; `INTERRUPT` and
//! `DESTROY` are fire-and-forget. Agent processes may also send an
//! unsolicited interrupt request at any time.
//!
//! Transports implement [`AgentConnector`] and deliver everything they
//! receive as [`InboundEvent`]s on a single-consumer channel owned by the
//! agent.

pub mod channel;
pub mod local;
pub mod message;
pub mod process;
pub mod wire;

pub use channel::{AgentChannel, AgentConnector, ConnectRequest};
pub use local::{InvokeCall, LocalConnector, MechanismHandler};
pub use message::{
    AgentReply, AgentRequest, AgentService, CreateResult, InboundEvent, OutboundMessage,
};
pub use process::ProcessConnector;
pub use wire::{Attachments, WireItem, WireValue};
