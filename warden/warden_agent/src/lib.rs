//! # Warden Agent
//!
//! Orchestration of external authentication agents.
//!
//! An [`Agent`] is one running instance of a mechanism for one
//! evaluation. It wraps a duplex channel to an agent process and exposes
//! the asynchronous protocol as blocking calls: every request waits on a
//! completion signal that the agent's inbound event thread fulfils.
//!
//! ## Modules
//!
//! - **ipc**: Message kinds, item wire encoding, the channel/connector
//!   abstraction and two transports (in-process and child process)
//! - **agent**: The agent state machine

pub mod agent;
pub mod ipc;

pub use agent::{Agent, AgentState, CreateOptions, InterruptListener};
pub use ipc::{
    AgentChannel, AgentConnector, AgentService, ConnectRequest, LocalConnector, ProcessConnector,
};
