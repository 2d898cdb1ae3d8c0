//! `warden lookup`: resolve the rule governing a right.

use crate::policy::Policy;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use warden_policy::RuleSource;

/// Arguments for the lookup command
#[derive(Args)]
pub struct LookupArgs {
    /// Policy file holding the rules
    #[clap(long, short)]
    pub policy: PathBuf,

    /// Right name to resolve
    pub right: String,
}

/// Print the resolved rule as JSON.
///
/// Falls back through the right's prefixes and the default rule exactly as
/// an authorization request would.
pub fn execute(args: &LookupArgs) -> Result<ExitCode> {
    let policy = Policy::load(&args.policy)?;
    let rule = policy
        .rules
        .find_rule(&args.right, false)
        .with_context(|| format!("Failed to resolve '{}'", args.right))?;
    debug!(right = %args.right, rule = rule.name(), "Resolved");

    let output = json!({
        "right": args.right,
        "rule": rule.name(),
        "definition": rule.to_definition(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}
