//! User rules.
//!
//! A user rule is satisfied by a credential that passes the acceptance
//! test for the rule. Credentials already held are tried first; when none
//! passes and the caller allows it, the user is asked to authenticate.

use super::Engine;
use crate::hints::{self, RetryReason};
use tracing::{debug, error, info};
use warden_core::types::{AuthStatus, AuthorizationFlags, Credential};
use warden_policy::{Mechanism, Rule, RuleFlags, AUTHENTICATE_RULE};

/// Outcome of testing a credential against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acceptance {
    Accepted,
    Rejected(RetryReason),
}

impl Engine {
    pub(super) fn evaluate_user(&mut self, rule: &Rule) -> AuthStatus {
        if let Some(status) = self.check_entitlement_and_group(rule) {
            return status;
        }

        if rule.check_flags(RuleFlags::ALLOW_ROOT) && self.token.uid() == 0 {
            info!(engine = %self.index, rule = rule.name(), "Root caller allowed");
            return AuthStatus::Allow;
        }

        if !rule.check_flags(RuleFlags::AUTHENTICATE_USER) {
            let session = self.token.session().owner_credential(self.services.directory.as_ref());
            return match self.check_credential(&session, rule, true) {
                Acceptance::Accepted => AuthStatus::Allow,
                Acceptance::Rejected(_) => {
                    debug!(engine = %self.index, rule = rule.name(), "Session owner not accepted");
                    AuthStatus::Deny
                }
            };
        }

        if self.accept_held_credentials(rule) {
            return AuthStatus::Allow;
        }

        if !self.flags.contains(AuthorizationFlags::EXTEND_RIGHTS) {
            debug!(engine = %self.index, rule = rule.name(), "No credential accepted and rights may not be extended");
            return AuthStatus::Deny;
        }

        if self.flags.contains(AuthorizationFlags::PRE_AUTHORIZE) && rule.timeout() == 0 {
            debug!(engine = %self.index, rule = rule.name(), "Pre-authorized");
            return AuthStatus::Allow;
        }

        if !self.flags.contains(AuthorizationFlags::INTERACTION_ALLOWED) {
            info!(engine = %self.index, rule = rule.name(), "Authentication needed but interaction not allowed");
            return AuthStatus::InteractionNotAllowed;
        }
        if !self.token.session().info().has_graphical_access() {
            info!(engine = %self.index, rule = rule.name(), "Session has no graphical access");
            return AuthStatus::InteractionNotAllowed;
        }
        if self.services.host.in_low_power_state()
            && !self.flags.contains(AuthorizationFlags::IGNORE_LOW_POWER)
            && !rule.check_flags(RuleFlags::IGNORE_LOW_POWER)
        {
            info!(engine = %self.index, rule = rule.name(), "Authentication unavailable in low power state");
            return AuthStatus::Deny;
        }

        self.authenticate(rule)
    }

    /// Entitlement plus group bypasses.
    fn check_entitlement_and_group(&self, rule: &Rule) -> Option<AuthStatus> {
        let process = self.token.process();
        let entitled = (rule.check_flags(RuleFlags::ENTITLED_AND_GROUP)
            && process.has_entitlement_for_right(self.current_right()))
            || (rule.check_flags(RuleFlags::VPN_ENTITLED_AND_GROUP)
                && process.has_entitlement(hints::VPN_ENTITLEMENT));
        if !entitled {
            return None;
        }

        let group = rule.group()?;
        let caller = Credential::create(self.token.uid(), false, self.services.directory.as_ref());
        if caller.check_membership(
            group,
            self.services.directory.as_ref(),
            self.services.host.as_ref(),
        ) {
            info!(engine = %self.index, rule = rule.name(), group, "Granted by entitlement and group");
            return Some(AuthStatus::Allow);
        }
        None
    }

    /// Try the engine's credentials, then the token's and session's.
    fn accept_held_credentials(&mut self, rule: &Rule) -> bool {
        let shared = rule.check_flags(RuleFlags::SHARED);
        let least_privileged = self.token.is_least_privileged();

        let held: Vec<Credential> = self.credentials.iter().cloned().collect();
        for credential in &held {
            if least_privileged {
                if self.check_right_credential(credential, rule, false) {
                    debug!(engine = %self.index, rule = rule.name(), "Right credential accepted");
                    return true;
                }
                if !credential.is_right()
                    && self.check_credential(credential, rule, false) == Acceptance::Accepted
                {
                    self.set_right_credential(shared);
                    return true;
                }
            } else if self.check_credential(credential, rule, false) == Acceptance::Accepted {
                debug!(engine = %self.index, rule = rule.name(), uid = credential.uid(), "Engine credential accepted");
                return true;
            }
        }

        let effective: Vec<Credential> = self.effective_credentials().iter().cloned().collect();
        for credential in &effective {
            let accepted = if least_privileged && credential.is_right() {
                self.check_right_credential(credential, rule, false)
            } else {
                self.check_credential(credential, rule, false) == Acceptance::Accepted
            };
            if accepted {
                debug!(engine = %self.index, rule = rule.name(), uid = credential.uid(), "Held credential accepted");
                self.set_credential(credential, false);
                return true;
            }
        }
        false
    }

    /// Test a user credential against `rule`.
    ///
    /// `ignore_shared` skips the check that refuses shared credentials for
    /// rules that do not allow sharing.
    fn check_credential(
        &self,
        credential: &Credential,
        rule: &Rule,
        ignore_shared: bool,
    ) -> Acceptance {
        let directory = self.services.directory.as_ref();
        let host = self.services.host.as_ref();
        let uid = credential.uid();
        let volume_unlock = host.in_volume_unlock_mode();

        if !credential.is_valid() && !volume_unlock {
            return Acceptance::Rejected(RetryReason::InvalidPassphrase);
        }
        if credential.age_secs(self.now) > rule.timeout() {
            debug!(engine = %self.index, uid, "Credential expired");
            return Acceptance::Rejected(RetryReason::Unknown);
        }
        if !ignore_shared && !rule.check_flags(RuleFlags::SHARED) && credential.is_shared() {
            debug!(engine = %self.index, uid, "Shared credential not usable for this rule");
            return Acceptance::Rejected(RetryReason::Unknown);
        }
        if uid == 0 {
            return Acceptance::Accepted;
        }
        if rule.check_flags(RuleFlags::SESSION_OWNER) && uid == self.token.session().owner_uid() {
            return Acceptance::Accepted;
        }
        if rule.check_flags(RuleFlags::REQUIRE_SECURE_TOKEN) && !directory.has_secure_token(uid) {
            debug!(engine = %self.index, uid, "User holds no secure token");
            return Acceptance::Rejected(RetryReason::UnacceptableUser);
        }

        match rule.group() {
            Some(group) => {
                if volume_unlock && directory.is_volume_owner(uid) {
                    return Acceptance::Accepted;
                }
                if credential.check_membership(group, directory, host) {
                    return Acceptance::Accepted;
                }
                debug!(engine = %self.index, uid, group, "User not in group");
                Acceptance::Rejected(RetryReason::UserNotInGroup)
            }
            None if rule.check_flags(RuleFlags::SESSION_OWNER) => {
                Acceptance::Rejected(RetryReason::UnacceptableUser)
            }
            None => Acceptance::Rejected(RetryReason::Unknown),
        }
    }

    /// Test a right credential against the current right.
    fn check_right_credential(&self, credential: &Credential, rule: &Rule, ignore_shared: bool) -> bool {
        credential.is_right()
            && credential.is_valid()
            && credential.name() == Some(self.current_right())
            && (ignore_shared || rule.check_flags(RuleFlags::SHARED) || !credential.is_shared())
    }

    /// Run the authentication mechanisms for `rule` until a user is
    /// accepted or the tries budget is spent.
    ///
    /// Unlike mechanism rules, zero tries is not unbounded here: no round
    /// runs and the result is `Deny`. Rule files refuse such user rules.
    fn authenticate(&mut self, rule: &Rule) -> AuthStatus {
        let tries = if self.credentials_given { 1 } else { rule.tries() };
        let mechanisms: Vec<Mechanism> = if rule.mechanisms().is_empty() {
            match self.services.rules.find_rule(AUTHENTICATE_RULE, true) {
                Ok(authenticate) => authenticate.mechanisms().to_vec(),
                Err(e) => {
                    error!(engine = %self.index, rule = rule.name(), "No authentication mechanisms: {}", e);
                    return AuthStatus::Internal;
                }
            }
        } else {
            rule.mechanisms().to_vec()
        };

        if let Some(group) = rule.group() {
            self.hints.set_string(hints::REQUIRE_USER_IN_GROUP, group);
        }

        let shared = rule.check_flags(RuleFlags::SHARED);
        self.reason = RetryReason::None;
        let mut status = AuthStatus::Deny;
        let mut count: u32 = 0;

        while count < tries {
            self.hints.set_string(hints::REASON, self.reason.as_str());
            self.hints.set_int(hints::TRIES, count as i32);
            status = self.run_chain(&mechanisms);
            count += 1;

            match status {
                AuthStatus::Allow => {
                    let uid = self.authenticated_uid();
                    let credential =
                        Credential::create(uid, false, self.services.directory.as_ref());
                    match self.check_credential(&credential, rule, true) {
                        Acceptance::Accepted => {
                            self.set_credential(&credential, shared);
                            if self.token.is_least_privileged() {
                                self.set_right_credential(shared);
                            } else if uid == self.token.session().owner_uid() {
                                self.token.session().info().mark_authenticated();
                            }
                            info!(engine = %self.index, rule = rule.name(), uid, tries = count, "User authenticated");
                            break;
                        }
                        Acceptance::Rejected(reason) => {
                            info!(engine = %self.index, rule = rule.name(), uid, reason = %reason, "Authenticated user not accepted");
                            self.reason = reason;
                            status = AuthStatus::Deny;
                        }
                    }
                }
                AuthStatus::Deny => self.reason = RetryReason::InvalidPassphrase,
                AuthStatus::Canceled | AuthStatus::Internal | AuthStatus::InteractionNotAllowed => {
                    break;
                }
            }
            if self.is_dismissed() {
                return AuthStatus::Canceled;
            }
        }

        if status == AuthStatus::Deny && tries > 0 && count >= tries && !self.is_dismissed() {
            info!(engine = %self.index, rule = rule.name(), tries = count, "Too many tries");
            self.reason = RetryReason::TooManyTries;
            self.hints.set_string(hints::REASON, self.reason.as_str());
            self.hints.set_int(hints::TRIES, count as i32);
            self.run_chain(&mechanisms);
        }

        self.hints.remove(hints::REQUIRE_USER_IN_GROUP);
        status
    }
}
