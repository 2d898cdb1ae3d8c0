//! # Warden Engine
//!
//! `warden_engine` decides authorization requests. An [`Engine`] is created
//! per authorization handle; each call to [`Engine::authorize`] resolves
//! every requested right to a rule, evaluates it recursively, and records
//! the rights granted and the credentials established along the way.
//!
//! Evaluation consults:
//!
//! - the caller's [`AuthToken`] and its [`Session`] for held credentials
//! - a [`RuleSource`](warden_policy::RuleSource) for policy
//! - [`Agent`](warden_agent::Agent)s for interactive mechanism steps
//! - the account directory and host environment for acceptance checks
//!
//! Every decision is an explicit [`AuthStatus`](warden_core::AuthStatus).

pub mod agents;
pub mod engine;
pub mod hints;
pub mod services;
pub mod token;

// Re-export key types for convenience
pub use agents::AgentCache;
pub use engine::{Engine, EngineHandle};
pub use hints::RetryReason;
pub use services::EngineServices;
pub use token::{AuthToken, Session};
