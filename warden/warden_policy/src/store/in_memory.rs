//! In-memory rule store.
//!
//! This module provides an in-memory implementation of the rule source,
//! optionally loaded from a TOML rule file.

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use warden_core::error::{ConfigError, Result, RuleError};

use super::RuleSource;
use crate::model::{Rule, RuleDefinition};

/// The layout of a rule file.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: BTreeMap<String, RuleDefinition>,
}

/// An in-memory rule store.
#[derive(Clone, Default)]
pub struct InMemoryRuleStore {
    /// The rules, indexed by name.
    rules: Arc<DashMap<String, Arc<Rule>>>,
}

impl InMemoryRuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from TOML text with `[rules."<name>"]` tables.
    ///
    /// Every delegate must name a rule defined in the same text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;

        let store = Self::new();
        for (name, definition) in &file.rules {
            store.put_rule(Rule::from_definition(name.clone(), definition)?)?;
        }

        for (name, definition) in &file.rules {
            if let Some(missing) = definition
                .delegates
                .iter()
                .find(|d| !file.rules.contains_key(d.as_str()))
            {
                return Err(RuleError::InvalidDefinition {
                    name: name.clone(),
                    reason: format!("delegate '{}' is not defined", missing),
                }
                .into());
            }
        }

        info!("Loaded {} rules", store.rules.len());
        Ok(store)
    }

    /// Load rules from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSource for InMemoryRuleStore {
    fn get_rule(&self, name: &str) -> Result<Option<Arc<Rule>>> {
        Ok(self.rules.get(name).map(|r| Arc::clone(r.value())))
    }

    fn put_rule(&self, rule: Rule) -> Result<()> {
        self.rules.insert(rule.name().to_string(), Arc::new(rule));
        Ok(())
    }

    fn remove_rule(&self, name: &str) -> Result<bool> {
        Ok(self.rules.remove(name).is_some())
    }

    fn list_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

impl std::fmt::Debug for InMemoryRuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRuleStore")
            .field("rules", &self.rules.len())
            .finish()
    }
}
