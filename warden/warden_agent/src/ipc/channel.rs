//! Channel and connector abstraction.

use super::message::{AgentService, InboundEvent, OutboundMessage};
use crossbeam_channel::Sender;
use std::fmt::Debug;
use std::sync::Arc;
use warden_core::error::TransportError;

/// The sending half of a connection to an agent.
pub trait AgentChannel: Send + Sync + Debug {
    /// Send a message.
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// What a connector needs to know to reach an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Service to connect to.
    pub service: AgentService,

    /// Plugin the connection is for.
    pub plugin: String,

    /// Mechanism parameter the connection is for.
    pub param: String,
}

/// Opens connections to agents.
pub trait AgentConnector: Send + Sync + Debug {
    /// Connect to an agent service.
    ///
    /// # Arguments
    ///
    /// * `request` - Which service and mechanism.
    /// * `events` - Where the transport delivers everything it receives.
    ///   The transport drops its senders when the connection ends.
    fn connect(
        &self,
        request: &ConnectRequest,
        events: Sender<InboundEvent>,
    ) -> Result<Arc<dyn AgentChannel>, TransportError>;
}
