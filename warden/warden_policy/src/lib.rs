//! # Warden Policy
//!
//! `warden_policy` models the authorization rule database consumed by the
//! Warden engine.
//!
//! Key concepts:
//!
//! 1. **Rule**: An immutable policy record governing how a right is
//!    granted. Rules delegate to other rules by name; delegates are resolved
//!    lazily at evaluation time.
//!
//! 2. **Mechanism**: One step of an authentication procedure, either a
//!    builtin in-process check or a plugin run by an external agent.
//!
//! 3. **Rule Source**: Storage for rules, with the prefix-stripping lookup
//!    that maps a right name to the most specific rule.

pub mod model;
pub mod store;

// Re-export key types and traits for convenience
pub use model::{
    Mechanism, MechanismKind, Rule, RuleClass, RuleDefinition, RuleFlags, AUTHENTICATE_RULE,
};
pub use store::{InMemoryRuleStore, RuleSource};
