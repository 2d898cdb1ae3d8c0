//! Core data types for the Warden authorization engine.
//!
//! This module defines the value types that flow through an evaluation:
//! typed item stores, ordered rights lists, credentials, flag sets and
//! status codes.

pub mod credential;
pub mod flags;
pub mod item;
pub mod rights;
pub mod status;

/// A user identifier.
///
/// Signed so that the sentinels `-1` (no user) and `-2` (right credential)
/// can be represented directly.
pub type Uid = i32;

/// Sentinel uid for "no user".
pub const UID_NONE: Uid = -1;

/// Sentinel uid carried by right credentials.
pub const UID_RIGHT: Uid = -2;

pub use credential::{Credential, CredentialIdentity, CredentialSet};
pub use flags::AuthorizationFlags;
pub use item::{Item, ItemFlags, ItemStore, ItemType};
pub use rights::{Right, RightsList};
pub use status::{AuthStatus, MechanismResult};
