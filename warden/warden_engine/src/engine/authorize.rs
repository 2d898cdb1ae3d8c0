use super::Engine;
use crate::hints;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_core::traits::AuditRecord;
use warden_core::types::{
    AuthStatus, AuthorizationFlags, Credential, CredentialSet, ItemFlags, ItemStore, RightsList,
};
use warden_policy::{RuleClass, RuleFlags};
use zeroize::Zeroizing;

/// Prefix of the rights guarding rule modifications.
const CONFIG_PREFIX: &str = "config.";

impl Engine {
    /// Evaluate a request.
    ///
    /// # Arguments
    ///
    /// * `rights` - The rights requested, in order.
    /// * `environment` - Caller-supplied items, such as a username and
    ///   password to authenticate with.
    /// * `flags` - Request flags.
    ///
    /// # Returns
    ///
    /// `Allow` if every right was granted, or with `PARTIAL_RIGHTS` if any
    /// was. Otherwise the status of the first right that failed.
    /// [`granted_rights`](Self::granted_rights) lists what was granted.
    pub fn authorize(
        &mut self,
        rights: &RightsList,
        environment: Option<&ItemStore>,
        flags: AuthorizationFlags,
    ) -> AuthStatus {
        self.now = Utc::now();
        self.flags = flags;
        self.granted.clear();
        self.credentials_given = false;
        self.save_password = false;

        info!(
            engine = %self.index,
            pid = self.token.process().pid(),
            rights = rights.len(),
            flags = ?flags,
            "Authorizing"
        );

        self.load_effective_credentials();
        if let Some(environment) = environment {
            if flags.contains(AuthorizationFlags::EXTEND_RIGHTS)
                && !flags.contains(AuthorizationFlags::SHEET)
            {
                self.apply_environment_credentials(environment);
            }
        }
        self.set_immutable_hints();

        let password_only = !flags.contains(AuthorizationFlags::IGNORE_PASSWORD_ONLY)
            && rights.names().any(|right| {
                self.services
                    .rules
                    .find_rule(right, false)
                    .is_ok_and(|rule| rule.check_flags(RuleFlags::PASSWORD_ONLY))
            });
        if password_only {
            self.hints.set_bool(hints::PASSWORD_ONLY, true);
        }

        let mut status = AuthStatus::Allow;
        for right in rights.iter() {
            status = self.authorize_right(right.name(), right.flags());
            match status {
                AuthStatus::Allow => {}
                AuthStatus::Canceled | AuthStatus::Internal => break,
                AuthStatus::Deny | AuthStatus::InteractionNotAllowed => {
                    if !flags.contains(AuthorizationFlags::PARTIAL_RIGHTS) {
                        break;
                    }
                    debug!(engine = %self.index, right = right.name(), status = %status, "Continuing with partial rights");
                }
            }
        }

        if flags.contains(AuthorizationFlags::PARTIAL_RIGHTS) && !self.granted.is_empty() {
            status = AuthStatus::Allow;
        }
        if self.is_dismissed() {
            status = AuthStatus::Canceled;
        }

        self.hints.remove(hints::PASSWORD_ONLY);

        if flags.contains(AuthorizationFlags::EXTEND_RIGHTS)
            && !flags.contains(AuthorizationFlags::DESTROY_RIGHTS)
        {
            self.write_back_credentials();
        }

        if matches!(status, AuthStatus::Allow | AuthStatus::Canceled) {
            if self.save_password {
                self.context
                    .set_flags(hints::PASSWORD, ItemFlags::EXTRACTABLE);
            }
            let mut extractable = ItemStore::new();
            extractable.copy_with_flags(&self.context, ItemFlags::EXTRACTABLE);
            self.token.update_context(&extractable);
        }

        if !self.is_dismissed() {
            self.agents.deactivate_all();
        }

        info!(
            engine = %self.index,
            status = %status,
            granted = self.granted.len(),
            "Authorization finished"
        );
        status
    }

    fn authorize_right(&mut self, right: &str, request_flags: AuthorizationFlags) -> AuthStatus {
        let process = self.token.process();
        if !process.sandbox_allows_right(right) {
            warn!(engine = %self.index, right, pid = process.pid(), "Right denied by sandbox");
            self.audit(right, "", AuthStatus::Deny);
            return AuthStatus::Deny;
        }

        let rule = match self.services.rules.find_rule(right, false) {
            Ok(rule) => rule,
            Err(e) => {
                error!(engine = %self.index, right, "Rule lookup failed: {}", e);
                self.audit(right, "", AuthStatus::Internal);
                return AuthStatus::Internal;
            }
        };
        let rule_name = if rule.name().is_empty() {
            "default".to_string()
        } else {
            rule.name().to_string()
        };

        self.current_right = Some(right.to_string());
        self.current_rule = Some(Arc::clone(&rule));
        self.set_temporary_hint(hints::AUTHORIZE_RIGHT, right);
        self.set_temporary_hint(hints::AUTHORIZE_RULE, &rule_name);
        if let Some(description) = rule.description() {
            self.set_temporary_hint(hints::RULE_DESCRIPTION, description);
        }

        debug!(engine = %self.index, right, rule = %rule_name, class = %rule.class(), "Evaluating right");
        let status = self.evaluate_rule(&rule, 0);

        if status == AuthStatus::Allow {
            self.granted.add_with_flags(right, request_flags);
            if self.flags.contains(AuthorizationFlags::PRE_AUTHORIZE)
                && rule.class() == RuleClass::User
                && rule.timeout() == 0
            {
                self.granted
                    .set_flags(right, AuthorizationFlags::PRE_AUTHORIZE);
            }
        }

        self.hints.remove_with_flags(ItemFlags::TEMPORARY);
        self.current_rule = None;
        self.current_right = None;

        info!(engine = %self.index, right, rule = %rule_name, status = %status, "Right evaluated");
        self.audit(right, &rule_name, status);
        status
    }

    fn set_temporary_hint(&mut self, key: &str, value: &str) {
        self.hints.set_string(key, value);
        self.hints.set_flags(key, ItemFlags::TEMPORARY);
    }

    fn audit(&self, right: &str, rule: &str, status: AuthStatus) {
        self.services.audit.record(&AuditRecord {
            engine: self.index,
            right: right.to_string(),
            rule: rule.to_string(),
            status,
            client_pid: self.token.process().pid(),
        });
    }

    /// Gather the credentials held by the token and its session.
    fn load_effective_credentials(&mut self) {
        let mut effective = self.token.credentials();
        effective.extend_from(&self.token.session().credentials());
        self.effective_credentials = effective;
    }

    /// Verify a username and password passed by the caller and establish
    /// the matching credential.
    fn apply_environment_credentials(&mut self, environment: &ItemStore) {
        let Some(username) = environment.get_string(hints::USERNAME).map(str::to_string) else {
            return;
        };
        let password = Zeroizing::new(
            environment
                .get_data(hints::PASSWORD)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        );
        let shared = environment.exists(hints::SHARED);

        let Some(account) = self.services.directory.lookup_name(&username) else {
            info!(engine = %self.index, user = %username, "Passed user is unknown");
            return;
        };
        if !self.services.verifier.verify(&username, &password) {
            info!(engine = %self.index, user = %username, "Passed credentials rejected");
            return;
        }

        let credential = Credential::create(account.uid, false, self.services.directory.as_ref());
        if !credential.is_valid() {
            info!(engine = %self.index, uid = account.uid, "Passed user is not valid");
            return;
        }

        self.set_credential(&credential, shared);
        self.context.set_string(hints::USERNAME, &username);
        self.context.set_flags(hints::USERNAME, ItemFlags::SENSITIVE);
        self.context.set_data(hints::PASSWORD, &password);
        self.context.set_flags(hints::PASSWORD, ItemFlags::SENSITIVE);
        self.credentials_given = true;
        debug!(engine = %self.index, uid = account.uid, shared, "Passed credentials accepted");
    }

    fn set_immutable_hints(&mut self) {
        let process = self.token.process();
        let creator = self.token.creator();
        let immutable = &mut self.immutable_hints;
        immutable.clear();
        immutable.set_int(hints::CLIENT_PID, process.pid());
        immutable.set_int(hints::CLIENT_UID, process.uid());
        immutable.set_string(hints::CLIENT_PATH, process.path());
        immutable.set_bool(hints::CLIENT_SIGNED, process.is_platform_signed());
        immutable.set_int(hints::CREATOR_PID, creator.pid());
        immutable.set_string(hints::CREATOR_PATH, creator.path());
    }

    /// Store the engine's credentials on the token, and shared ones in
    /// the session.
    fn write_back_credentials(&self) {
        let least_privileged = self.token.is_least_privileged();
        let session = self.token.session();
        for credential in self.credentials.iter() {
            if least_privileged && !credential.is_right() {
                continue;
            }
            self.token.set_credential(credential);
            if credential.is_shared() {
                session.set_credential(credential);
            }
        }
    }

    /// Authorize a modification of the rule named `name`.
    ///
    /// Adding a rule requires `config.add.<name>`, changing an existing
    /// one `config.modify.<name>` and removing one `config.remove.<name>`.
    /// Rights already under `config.` are checked verbatim. Wildcard names
    /// are refused, and removing a rule that does not exist is allowed.
    pub fn verify_modify(&mut self, name: &str, remove: bool) -> AuthStatus {
        if name.is_empty() || name.ends_with('.') {
            warn!(engine = %self.index, right = name, "Refusing to modify a wildcard rule");
            return AuthStatus::Deny;
        }

        let right = if name.starts_with(CONFIG_PREFIX) {
            name.to_string()
        } else {
            let exists = match self.services.rules.get_rule(name) {
                Ok(rule) => rule.is_some(),
                Err(e) => {
                    error!(engine = %self.index, right = name, "Rule lookup failed: {}", e);
                    return AuthStatus::Internal;
                }
            };
            match (exists, remove) {
                (true, true) => format!("{}remove.{}", CONFIG_PREFIX, name),
                (true, false) => format!("{}modify.{}", CONFIG_PREFIX, name),
                (false, false) => format!("{}add.{}", CONFIG_PREFIX, name),
                (false, true) => return AuthStatus::Allow,
            }
        };

        let mut rights = RightsList::new();
        rights.add(right);
        self.authorize(
            &rights,
            None,
            AuthorizationFlags::INTERACTION_ALLOWED | AuthorizationFlags::EXTEND_RIGHTS,
        )
    }

    /// Credentials this request may reuse without authenticating.
    pub(super) fn effective_credentials(&self) -> &CredentialSet {
        &self.effective_credentials
    }
}
