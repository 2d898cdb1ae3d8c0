//! # Warden Core
//!
//! `warden_core` provides the fundamental building blocks for the Warden
//! authorization engine. This includes error types, identifiers, the typed
//! item stores exchanged with authentication agents, ordered rights lists,
//! credentials, and the narrow interfaces through which the engine consults
//! the rest of the host.
//!
//! ## Core Principles
//!
//! 1. **Explicit outcomes**: Every authorization decision is an
//!    [`AuthStatus`] value. Errors are reserved for configuration, storage
//!    and transport failures.
//!
//! 2. **Owned evaluation state**: Item stores, rights lists and credential
//!    sets are ordinary owned values. Nothing is shared between evaluations
//!    except through an explicit promotion step.
//!
//! 3. **Sensitive data hygiene**: Items flagged [`ItemFlags::SENSITIVE`] are
//!    zeroed when dropped or overwritten and never appear in `Debug` output.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for all Warden components
//! - **id**: Token identifiers and process-wide engine/agent indices
//! - **traits**: Interfaces to external collaborators (process, session,
//!   directory, audit)
//! - **types**: Items, rights, credentials, flags and status codes
//! - **utils**: Configuration and logging helpers

pub mod error;
pub mod id;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export key types and traits for convenience
pub use error::{Error, Result};
pub use id::{AgentIndex, EngineIndex, TokenId};
pub use traits::{
    Account, AccountDirectory, AuditRecord, AuditSink, CredentialVerifier, HostEnvironment,
    ProcessInfo, SessionInfo,
};
pub use types::{
    AuthStatus, AuthorizationFlags, Credential, CredentialSet, Item, ItemFlags, ItemStore,
    ItemType, MechanismResult, Right, RightsList, Uid,
};
pub use utils::{EngineConfig, LogLevel};
