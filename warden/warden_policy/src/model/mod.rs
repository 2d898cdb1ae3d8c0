//! Policy model.
//!
//! This module defines rules and the mechanisms they reference.

mod mechanism;
mod rule;

pub use mechanism::{Mechanism, MechanismKind, MechanismRow};
pub use rule::{Rule, RuleClass, RuleDefinition, RuleFlags, AUTHENTICATE_RULE};
