use super::Engine;
use crate::hints::{self, RetryReason};
use tracing::{debug, error, info, warn};
use warden_core::types::{AuthStatus, AuthorizationFlags, Credential};
use warden_policy::{Rule, RuleClass, RuleFlags};

impl Engine {
    /// Evaluate `rule` for the current right.
    ///
    /// `depth` counts delegation levels; past the configured maximum the
    /// evaluation fails with `Internal`.
    pub(super) fn evaluate_rule(&mut self, rule: &Rule, depth: usize) -> AuthStatus {
        if depth > self.services.config.engine.max_rule_depth {
            error!(engine = %self.index, rule = rule.name(), depth, "Rule delegation too deep");
            return AuthStatus::Internal;
        }

        let process = self.token.process();
        if rule.check_flags(RuleFlags::ENTITLED)
            && process.has_entitlement_for_right(self.current_right())
        {
            info!(engine = %self.index, rule = rule.name(), pid = process.pid(), "Granted by entitlement");
            return AuthStatus::Allow;
        }

        if (rule.check_flags(RuleFlags::REQUIRE_PLATFORM_SIGNED)
            || self.flags.contains(AuthorizationFlags::SHEET))
            && !process.is_platform_signed()
        {
            if self.services.config.engine.enforce_platform_signing {
                warn!(engine = %self.index, rule = rule.name(), path = process.path(), "Caller is not platform signed");
                return AuthStatus::Deny;
            }
            debug!(engine = %self.index, rule = rule.name(), "Platform signing not enforced");
        }

        if rule.check_flags(RuleFlags::EXTRACT_PASSWORD)
            && process.has_entitlement(hints::EXTRACT_PASSWORD_ENTITLEMENT)
        {
            self.save_password = true;
        }

        match rule.class() {
            RuleClass::Allow => {
                debug!(engine = %self.index, rule = rule.name(), "Rule allows");
                AuthStatus::Allow
            }
            RuleClass::Deny => {
                debug!(engine = %self.index, rule = rule.name(), "Rule denies");
                AuthStatus::Deny
            }
            RuleClass::User => self.evaluate_user(rule),
            RuleClass::Rule => self.evaluate_delegates(rule, depth),
            RuleClass::Mechanism => self.evaluate_mechanisms(rule),
            RuleClass::Invalid => {
                error!(engine = %self.index, rule = rule.name(), "Rule has no usable class");
                AuthStatus::Internal
            }
        }
    }

    /// Evaluate a delegating rule.
    ///
    /// With `kofn == 0` every delegate must succeed. Otherwise evaluation
    /// stops as soon as `kofn` delegates succeeded, or as soon as too few
    /// remain to get there.
    fn evaluate_delegates(&mut self, rule: &Rule, depth: usize) -> AuthStatus {
        let delegates = rule.delegates();
        let total = delegates.len();
        let kofn = rule.kofn() as usize;
        let mut status = AuthStatus::Deny;
        let mut successes = 0;

        for (count, name) in delegates.iter().enumerate() {
            let delegate = match self.services.rules.get_rule(name) {
                Ok(Some(delegate)) => delegate,
                Ok(None) => {
                    error!(engine = %self.index, rule = rule.name(), delegate = %name, "Delegate rule missing");
                    return AuthStatus::Internal;
                }
                Err(e) => {
                    error!(engine = %self.index, rule = rule.name(), delegate = %name, "Delegate lookup failed: {}", e);
                    return AuthStatus::Internal;
                }
            };

            status = self.evaluate_rule(&delegate, depth + 1);
            debug!(engine = %self.index, rule = rule.name(), delegate = %name, status = %status, "Delegate evaluated");

            if status.is_fatal() {
                return status;
            }

            if kofn == 0 {
                if status != AuthStatus::Allow {
                    return status;
                }
                continue;
            }

            if status == AuthStatus::Allow {
                successes += 1;
                if successes == kofn {
                    return AuthStatus::Allow;
                }
            }
            let remaining = total - (count + 1);
            if remaining < kofn - successes {
                debug!(engine = %self.index, rule = rule.name(), successes, remaining, "Threshold unreachable");
                return AuthStatus::Deny;
            }
        }

        if kofn == 0 {
            // Every delegate succeeded, or there were none.
            return if total == 0 { AuthStatus::Deny } else { status };
        }
        AuthStatus::Deny
    }

    /// Evaluate a mechanism rule: run its chain until it stops returning
    /// `Deny` or the tries budget is spent. `tries == 0` retries forever.
    fn evaluate_mechanisms(&mut self, rule: &Rule) -> AuthStatus {
        if self.services.host.in_low_power_state()
            && !self.flags.contains(AuthorizationFlags::IGNORE_LOW_POWER)
            && !rule.check_flags(RuleFlags::IGNORE_LOW_POWER)
            && rule.has_unprivileged_mechanism()
        {
            warn!(engine = %self.index, rule = rule.name(), "Interactive mechanisms unavailable in low power state");
            return AuthStatus::Deny;
        }

        let tries = rule.tries();
        let shared = rule.check_flags(RuleFlags::SHARED);
        let mut count: u32 = 0;
        loop {
            self.hints.set_int(hints::TRIES, count as i32);
            let status = self.run_chain(rule.mechanisms());
            count += 1;

            if status == AuthStatus::Allow && self.context.exists(hints::CONTEXT_UID) {
                let uid = self.authenticated_uid();
                let credential = Credential::create(uid, false, self.services.directory.as_ref());
                if credential.is_valid() {
                    self.set_credential(&credential, shared);
                    if self.token.is_least_privileged() {
                        self.set_right_credential(shared);
                    }
                }
            }

            let retry = status == AuthStatus::Deny
                && (tries == 0 || count < tries)
                && !self.is_dismissed();
            if !retry {
                debug!(engine = %self.index, rule = rule.name(), tries = count, status = %status, "Mechanism rule finished");
                return status;
            }
            self.reason = RetryReason::InvalidPassphrase;
            self.hints.set_string(hints::REASON, self.reason.as_str());
        }
    }
}
