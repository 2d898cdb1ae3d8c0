//! Identifiers for the Warden engine.
//!
//! Two kinds of identifier are used:
//!
//! - [`Id`] is a UUID wrapper with a phantom type parameter, used for
//!   long-lived objects that may be referenced from outside the process
//!   (authorization tokens).
//! - [`Index`] is a process-wide monotonic counter, used to tag engines and
//!   agents in log output. Indices are cheap, ordered, and only meaningful
//!   within one process lifetime.
//!
//! # Examples
//!
//! ```
//! use warden_core::id::{EngineIndex, TokenId};
//!
//! let a = EngineIndex::next();
//! let b = EngineIndex::next();
//! assert!(b > a);
//!
//! let token = TokenId::new();
//! assert!(!token.is_nil());
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Serialize, Deserialize)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Create a nil (all zeros) identifier.
    pub fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    /// Check if this is a nil identifier.
    pub fn is_nil(&self) -> bool {
        self.uuid.is_nil()
    }
}

// Manual impls so `T` does not need to satisfy the bounds a derive would add.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.uuid)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::from_str(s)?))
    }
}

/// Counter source for an [`Index`] kind.
pub trait IndexKind {
    /// Label used when the index is displayed.
    const LABEL: &'static str;

    /// The process-wide counter for this kind.
    fn counter() -> &'static AtomicU64;
}

/// A process-wide monotonic index.
pub struct Index<T> {
    value: u64,
    _marker: PhantomData<T>,
}

impl<T: IndexKind> Index<T> {
    /// Allocate the next index of this kind.
    pub fn next() -> Self {
        Self {
            value: T::counter().fetch_add(1, Ordering::Relaxed) + 1,
            _marker: PhantomData,
        }
    }
}

impl<T> Index<T> {
    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Index<T> {}

impl<T> PartialEq for Index<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Index<T> {}

impl<T> PartialOrd for Index<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Index<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Index<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IndexKind> fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", T::LABEL, self.value)
    }
}

impl<T: IndexKind> fmt::Display for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

macro_rules! define_index {
    ($(#[$meta:meta])* $marker:ident, $alias:ident, $label:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $marker {}

        impl IndexKind for $marker {
            const LABEL: &'static str = $label;

            fn counter() -> &'static AtomicU64 {
                static COUNTER: AtomicU64 = AtomicU64::new(0);
                &COUNTER
            }
        }

        $(#[$meta])*
        pub type $alias = Index<$marker>;
    };
}

define_index!(
    /// Index tagging one engine instance in logs.
    EngineMarker,
    EngineIndex,
    "engine"
);

define_index!(
    /// Index tagging one agent instance in logs.
    AgentMarker,
    AgentIndex,
    "agent"
);

/// Marker for authorization token identifiers.
#[derive(Debug)]
pub enum TokenMarker {}

/// Identifier of an authorization token.
pub type TokenId = Id<TokenMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_monotonic() {
        let first = AgentIndex::next();
        let second = AgentIndex::next();
        assert!(second > first);
        assert_ne!(first, second);
    }

    #[test]
    fn test_index_kinds_are_independent() {
        let engine = EngineIndex::next();
        let _ = AgentIndex::next();
        let _ = AgentIndex::next();
        let next_engine = EngineIndex::next();
        // Only engines bump the engine counter, though other tests may run concurrently.
        assert!(next_engine.value() > engine.value());
        assert_eq!(format!("{:?}", engine), format!("engine {}", engine.value()));
    }

    #[test]
    fn test_token_id_roundtrip() {
        let id_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = TokenId::from_str(id_str).unwrap();
        assert_eq!(id.to_string(), id_str);
        assert!(TokenId::nil().is_nil());
        assert_ne!(TokenId::new(), TokenId::new());
    }
}
