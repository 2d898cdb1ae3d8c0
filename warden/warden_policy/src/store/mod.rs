//! Rule storage.
//!
//! This module provides storage for rules and the lookup that maps a right
//! name to the rule governing it.

mod in_memory;

pub use in_memory::InMemoryRuleStore;

use crate::model::Rule;
use std::sync::Arc;
use tracing::trace;
use warden_core::error::{Result, RuleError};

/// Name of the catch-all rule consulted when no prefix matches.
pub const DEFAULT_RULE: &str = "";

/// Trait for rule storage.
///
/// A rule source stores rule records and resolves right names to rules.
pub trait RuleSource: Send + Sync {
    /// Get the rule stored under exactly `name`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(rule))` - The rule.
    /// * `Ok(None)` - If no rule has that name.
    /// * `Err` - If the store could not be read.
    fn get_rule(&self, name: &str) -> Result<Option<Arc<Rule>>>;

    /// Store a rule, replacing any rule of the same name.
    fn put_rule(&self, rule: Rule) -> Result<()>;

    /// Remove a rule.
    ///
    /// # Returns
    ///
    /// `true` if a rule was removed.
    fn remove_rule(&self, name: &str) -> Result<bool>;

    /// List the stored rule names.
    fn list_names(&self) -> Result<Vec<String>>;

    /// Resolve `name` to a rule.
    ///
    /// # Arguments
    ///
    /// * `name` - The right or rule name.
    /// * `exact_match` - If `true`, only a rule named exactly `name` is
    ///   returned.
    ///
    /// # Returns
    ///
    /// With `exact_match`, the rule or `RuleError::NotFound`. Otherwise the
    /// most specific rule: `name` is retried with its last component
    /// stripped (`a.b.c` → `a.b.` → `a.`), then the rule named `""`, then
    /// [`Rule::builtin_default`].
    fn find_rule(&self, name: &str, exact_match: bool) -> Result<Arc<Rule>> {
        if exact_match {
            return self
                .get_rule(name)?
                .ok_or_else(|| RuleError::NotFound(name.to_string()).into());
        }

        let mut key = name.to_string();
        loop {
            if let Some(rule) = self.get_rule(&key)? {
                trace!(right = name, rule = %key, "Rule resolved");
                return Ok(rule);
            }
            // A trailing dot marks a domain wildcard; strip it before
            // looking for the next component boundary.
            let trimmed = key.strip_suffix('.').unwrap_or(&key);
            match trimmed.rfind('.') {
                Some(pos) => key = trimmed[..=pos].to_string(),
                None => break,
            }
        }

        if let Some(rule) = self.get_rule(DEFAULT_RULE)? {
            trace!(right = name, "Using default rule");
            return Ok(rule);
        }

        trace!(right = name, "Using builtin default rule");
        Ok(Arc::new(Rule::builtin_default()))
    }
}
