//! `warden check`: run an authorization request against a policy file.

use super::exit_code;
use crate::policy::Policy;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use warden_agent::ProcessConnector;
use warden_core::traits::SessionInfo;
use warden_core::types::{AuthorizationFlags, ItemStore, RightsList};
use warden_core::EngineConfig;
use warden_engine::{hints, AuthToken, Engine, EngineServices, Session};
use zeroize::Zeroizing;

/// Arguments for the check command
#[derive(Args)]
pub struct CheckArgs {
    /// Policy file describing rules, accounts, caller and session
    #[clap(long, short)]
    pub policy: PathBuf,

    /// Rights to authorize, in order
    #[clap(required = true)]
    pub rights: Vec<String>,

    /// Allow mechanisms to interact with the user
    #[clap(long)]
    pub interactive: bool,

    /// Allow rights to be obtained, not only confirmed
    #[clap(long)]
    pub extend_rights: bool,

    /// Report success if any right was granted
    #[clap(long)]
    pub partial: bool,

    /// Pre-authorize rights that would need a prompt
    #[clap(long)]
    pub pre_authorize: bool,

    /// Skip the low power check
    #[clap(long)]
    pub ignore_low_power: bool,

    /// User to authenticate as without prompting
    #[clap(long)]
    pub username: Option<String>,

    /// Password for --username
    #[clap(long, env = "WARDEN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Share passed credentials with the whole session
    #[clap(long)]
    pub shared: bool,
}

impl CheckArgs {
    fn flags(&self) -> AuthorizationFlags {
        let mut flags = AuthorizationFlags::empty();
        flags.set(AuthorizationFlags::INTERACTION_ALLOWED, self.interactive);
        // Passed credentials are only honored when rights may be extended.
        flags.set(
            AuthorizationFlags::EXTEND_RIGHTS,
            self.extend_rights || self.username.is_some(),
        );
        flags.set(AuthorizationFlags::PARTIAL_RIGHTS, self.partial);
        flags.set(AuthorizationFlags::PRE_AUTHORIZE, self.pre_authorize);
        flags.set(AuthorizationFlags::IGNORE_LOW_POWER, self.ignore_low_power);
        flags
    }

    fn environment(&self) -> Option<ItemStore> {
        let username = self.username.as_deref()?;
        let password = Zeroizing::new(self.password.clone().unwrap_or_default());

        let mut environment = ItemStore::new();
        environment.set_string(hints::USERNAME, username);
        environment.set_data(hints::PASSWORD, password.as_bytes());
        if self.shared {
            environment.set_bool(hints::SHARED, true);
        }
        Some(environment)
    }

    fn rights(&self) -> RightsList {
        let mut rights = RightsList::new();
        for right in &self.rights {
            rights.add(right.as_str());
        }
        rights
    }
}

/// Authorize the requested rights and print the outcome as JSON.
///
/// # Returns
///
/// An exit code that is zero only when the request was allowed.
pub fn execute(args: &CheckArgs, config: EngineConfig) -> Result<ExitCode> {
    let policy = Policy::load(&args.policy)?;

    let connector = ProcessConnector::from_config(&config.agent);
    let directory = Arc::new(policy.directory);
    let services = EngineServices::new(
        Arc::new(policy.rules),
        directory.clone(),
        directory,
        Arc::new(connector),
    )
    .with_host(Arc::new(policy.host))
    .with_config(config);

    let session_info: Arc<dyn SessionInfo> = Arc::new(policy.session);
    let session = Arc::new(Session::new(session_info));
    let token = Arc::new(AuthToken::new(Arc::new(policy.caller), session));

    let mut engine = Engine::new(token, services).context("Failed to start engine")?;
    let environment = args.environment();
    let status = engine.authorize(&args.rights(), environment.as_ref(), args.flags());
    info!(engine = %engine.index(), status = %status, "Request finished");

    let granted: Vec<&str> = engine.granted_rights().names().collect();
    let output = json!({
        "status": status.as_str(),
        "granted": granted,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(ExitCode::from(exit_code(status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[clap(flatten)]
        args: CheckArgs,
    }

    fn parse(argv: &[&str]) -> CheckArgs {
        let mut full = vec!["check"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).args
    }

    #[test]
    fn test_flags_from_arguments() {
        let args = parse(&["-p", "policy.toml", "a", "b", "--interactive", "--partial"]);
        let flags = args.flags();
        assert!(flags.contains(AuthorizationFlags::INTERACTION_ALLOWED));
        assert!(flags.contains(AuthorizationFlags::PARTIAL_RIGHTS));
        assert!(!flags.contains(AuthorizationFlags::EXTEND_RIGHTS));
        assert_eq!(args.rights().names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(args.environment().is_none());
    }

    #[test]
    fn test_username_implies_extend_rights() {
        let args = parse(&[
            "-p",
            "policy.toml",
            "a",
            "--username",
            "alice",
            "--password",
            "secret",
            "--shared",
        ]);
        assert!(args.flags().contains(AuthorizationFlags::EXTEND_RIGHTS));

        let environment = args.environment().unwrap();
        assert_eq!(environment.get_string(hints::USERNAME), Some("alice"));
        assert_eq!(environment.get_data(hints::PASSWORD), Some(&b"secret"[..]));
        assert!(environment.exists(hints::SHARED));
    }
}
