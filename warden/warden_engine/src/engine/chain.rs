//! Mechanism chain execution.
//!
//! A chain walks its mechanisms in order, feeding each step the hints and
//! context produced by the previous ones. Builtin checks run in place;
//! everything else runs in a cached agent.
//!
//! An agent earlier in the chain may ask to be shown again, for example
//! because the world it rendered changed. The walk then rewinds to that
//! agent, adopting the hints and context it last returned.

use super::Engine;
use crate::hints::{self, RetryReason};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use warden_agent::{Agent, AgentService, CreateOptions, InterruptListener};
use warden_core::types::{AuthStatus, ItemFlags, MechanismResult};
use warden_policy::{Mechanism, MechanismKind};

impl Engine {
    /// Run `mechanisms` once.
    ///
    /// On `Allow` or a user cancel the chain's context is promoted into the
    /// engine context. On `Deny` its sticky items are kept to seed the
    /// next attempt.
    pub(super) fn run_chain(&mut self, mechanisms: &[Mechanism]) -> AuthStatus {
        let mut chain_context = self.context.clone();
        chain_context.copy(&self.sticky_context);
        let mut chain_hints = self.hints.clone();
        let mut result = MechanismResult::Allow;

        let mut position = 0;
        while position < mechanisms.len() {
            if self.is_dismissed() {
                break;
            }
            let mechanism = &mechanisms[position];

            if mechanism.kind() == MechanismKind::Entitled {
                let entitled = self
                    .token
                    .process()
                    .has_entitlement_for_right(self.current_right());
                result = if entitled {
                    MechanismResult::Allow
                } else {
                    MechanismResult::Deny
                };
                debug!(engine = %self.index, mechanism = %mechanism, result = %result, "Builtin check");
            } else if self.credentials_given && self.skipped_with_credentials(mechanism) {
                debug!(engine = %self.index, mechanism = %mechanism, "Skipped, credentials were passed");
                position += 1;
                continue;
            } else {
                let Some(agent) = self.agent_for(mechanism, position == 0) else {
                    warn!(engine = %self.index, mechanism = %mechanism, "Mechanism unavailable");
                    result = MechanismResult::Undefined;
                    break;
                };

                if let Some((earlier, interrupting)) =
                    self.agents.find_interrupting(&mechanisms[..position])
                {
                    info!(
                        engine = %self.index,
                        mechanism = %mechanisms[earlier],
                        agent = %interrupting.index(),
                        "Resuming chain at interrupting mechanism"
                    );
                    chain_context = interrupting.context();
                    chain_hints = interrupting.hints();
                    position = earlier;
                    continue;
                }

                result = agent.run(&chain_hints, &chain_context, &self.immutable_hints);
                chain_context.copy(&agent.context());
                chain_hints.copy(&agent.hints());

                if let Some((earlier, interrupting)) =
                    self.agents.find_interrupting(&mechanisms[..position])
                {
                    info!(
                        engine = %self.index,
                        mechanism = %mechanisms[earlier],
                        agent = %interrupting.index(),
                        "Mechanism interrupted while running, restarting chain"
                    );
                    if let Err(e) = agent.deactivate() {
                        debug!(engine = %self.index, agent = %agent.index(), "Deactivate failed: {}", e);
                    }
                    chain_context = interrupting.context();
                    chain_hints = interrupting.hints();
                    chain_hints.set_string(hints::REASON, RetryReason::WorldChanged.as_str());
                    self.agents.clear_interrupts();
                    result = MechanismResult::Allow;
                    position = earlier;
                    continue;
                }
            }

            if result != MechanismResult::Allow {
                break;
            }
            position += 1;
        }

        if self.is_dismissed() {
            info!(engine = %self.index, "Chain abandoned, engine dismissed");
            return AuthStatus::Canceled;
        }

        match result {
            MechanismResult::Allow | MechanismResult::UserCanceled => {
                for key in [hints::PASSWORD, hints::USERNAME] {
                    if chain_context.exists(key) {
                        chain_context.set_flags(key, ItemFlags::EXTRACTABLE);
                    }
                }
                let mut promote = ItemFlags::EXTRACTABLE | ItemFlags::VOLATILE;
                if self.credentials_given {
                    promote |= ItemFlags::STICKY;
                }
                self.context.copy_with_flags(&chain_context, promote);
            }
            MechanismResult::Deny => {
                self.sticky_context.clear();
                self.sticky_context
                    .copy_with_flags(&chain_context, ItemFlags::STICKY);
            }
            MechanismResult::Undefined => {}
        }

        result.into_status()
    }

    fn skipped_with_credentials(&self, mechanism: &Mechanism) -> bool {
        let descriptor = mechanism.descriptor();
        self.services
            .config
            .mechanisms
            .skip_with_preset_credentials
            .iter()
            .any(|skipped| *skipped == descriptor)
    }

    /// Get the cached agent for `mechanism`, starting one if needed.
    fn agent_for(&self, mechanism: &Mechanism, first: bool) -> Option<Arc<Agent>> {
        if let Some(agent) = self.agents.get(mechanism) {
            return Some(agent);
        }

        let session = self.token.session().info();
        let options = CreateOptions {
            service: AgentService::select(mechanism.is_privileged(), session.is_login_window()),
            audit_session: Some(session.audit_session_id()),
            bootstrap: None,
            first,
            retry_limit: self.services.config.agent.create_retry_limit,
        };
        let cache = Arc::downgrade(&self.agents);
        let listener: Weak<dyn InterruptListener> = cache;

        let agent = Agent::create(
            mechanism,
            self.services.connector.as_ref(),
            &options,
            Some(listener),
        )?;
        debug!(engine = %self.index, agent = %agent.index(), mechanism = %mechanism, "Agent started");
        self.agents.insert(Arc::clone(&agent));
        Some(agent)
    }
}
