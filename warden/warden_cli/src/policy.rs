//! Policy files.
//!
//! A policy file is a rule file with the surroundings of one request
//! added: the account table, the calling process, its session and the
//! host modes.
//!
//! ```toml
//! [rules."system.preferences"]
//! class = "user"
//! session_owner = true
//!
//! [[accounts]]
//! uid = 501
//! name = "alice"
//! groups = ["admin"]
//! password = "secret"
//!
//! [caller]
//! pid = 4242
//! uid = 501
//! path = "/usr/bin/tool"
//!
//! [session]
//! owner_uid = 501
//! graphical = true
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use warden_core::traits::{StaticAccount, StaticDirectory, StaticHost, StaticProcess, StaticSession};
use warden_policy::InMemoryRuleStore;

/// Everything in a policy file except the rules.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Surroundings {
    accounts: Vec<StaticAccount>,
    caller: StaticProcess,
    session: StaticSession,
    host: StaticHost,
}

/// A loaded policy file.
#[derive(Debug)]
pub struct Policy {
    pub rules: InMemoryRuleStore,
    pub directory: StaticDirectory,
    pub caller: StaticProcess,
    pub session: StaticSession,
    pub host: StaticHost,
}

impl Policy {
    /// Read and parse a policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid policy {}", path.display()))
    }

    /// Parse policy text.
    pub fn parse(content: &str) -> Result<Self> {
        let rules = InMemoryRuleStore::from_toml_str(content)?;
        let surroundings: Surroundings = toml::from_str(content)?;

        let directory = surroundings
            .accounts
            .into_iter()
            .fold(StaticDirectory::new(), StaticDirectory::with_account);

        Ok(Self {
            rules,
            directory,
            caller: surroundings.caller,
            session: surroundings.session,
            host: surroundings.host,
        })
    }
}
