//! The rule interpreter.
//!
//! An [`Engine`] holds all mutable evaluation state for one authorization
//! handle. Rules are immutable snapshots; everything that changes while a
//! right is evaluated lives here:
//!
//! - `hints`, `context`, `sticky_context` and `immutable_hints`, the item
//!   stores exchanged with mechanisms
//! - the granted rights of the current request
//! - the credentials established so far, and the effective credentials
//!   inherited from the token and session
//! - the agent cache
//!
//! The interpreter is split by concern:
//!
//! - `authorize`: the request loop, environment credentials, write-back
//!   and rights-modification checks
//! - `evaluate`: rule dispatch, delegation and mechanism rules
//! - `user`: user rules, credential acceptance and authentication
//! - `chain`: mechanism chain execution

mod authorize;
mod chain;
mod evaluate;
mod user;

use crate::agents::AgentCache;
use crate::hints::{self, RetryReason};
use crate::services::EngineServices;
use crate::token::AuthToken;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::error::Result;
use warden_core::id::EngineIndex;
use warden_core::types::{
    AuthorizationFlags, Credential, CredentialSet, ItemStore, RightsList, Uid, UID_NONE,
};
use warden_policy::Rule;

/// Dismisses an engine from another thread.
#[derive(Clone)]
pub struct EngineHandle {
    index: EngineIndex,
    dismissed: Arc<AtomicBool>,
    agents: Arc<AgentCache>,
}

impl EngineHandle {
    /// Mark the engine dismissed and destroy every agent it started.
    ///
    /// A chain blocked on an agent returns immediately and the request
    /// ends with `Canceled`.
    pub fn dismiss(&self) {
        if !self.dismissed.swap(true, Ordering::AcqRel) {
            info!(engine = %self.index, "Engine dismissed");
        }
        self.agents.destroy_all();
    }

    /// Whether the engine has been dismissed.
    pub fn is_dismissed(&self) -> bool {
        self.dismissed.load(Ordering::Acquire)
    }

    /// Index of the engine.
    pub fn index(&self) -> EngineIndex {
        self.index
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("index", &self.index)
            .field("dismissed", &self.is_dismissed())
            .finish()
    }
}

/// Evaluation context for one authorization handle.
pub struct Engine {
    index: EngineIndex,
    token: Arc<AuthToken>,
    services: EngineServices,

    /// Wall-clock snapshot taken when a request starts.
    now: DateTime<Utc>,
    flags: AuthorizationFlags,

    hints: ItemStore,
    context: ItemStore,
    sticky_context: ItemStore,
    immutable_hints: ItemStore,

    granted: RightsList,
    credentials: CredentialSet,
    effective_credentials: CredentialSet,

    current_rule: Option<Arc<Rule>>,
    current_right: Option<String>,

    reason: RetryReason,
    credentials_given: bool,
    save_password: bool,

    agents: Arc<AgentCache>,
    dismissed: Arc<AtomicBool>,
}

impl Engine {
    /// Create an engine for `token`.
    ///
    /// # Errors
    ///
    /// Fails only if the agent cache cannot start its queue.
    pub fn new(token: Arc<AuthToken>, services: EngineServices) -> Result<Self> {
        let index = EngineIndex::next();
        let agents = Arc::new(AgentCache::new(index)?);
        debug!(engine = %index, token = %token.id(), pid = token.process().pid(), "Engine created");

        Ok(Self {
            index,
            token,
            services,
            now: Utc::now(),
            flags: AuthorizationFlags::empty(),
            hints: ItemStore::new(),
            context: ItemStore::new(),
            sticky_context: ItemStore::new(),
            immutable_hints: ItemStore::new(),
            granted: RightsList::new(),
            credentials: CredentialSet::new(),
            effective_credentials: CredentialSet::new(),
            current_rule: None,
            current_right: None,
            reason: RetryReason::None,
            credentials_given: false,
            save_password: false,
            agents,
            dismissed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Engine index used in logs and audit records.
    pub fn index(&self) -> EngineIndex {
        self.index
    }

    /// The token being authorized.
    pub fn token(&self) -> &Arc<AuthToken> {
        &self.token
    }

    /// A handle that can dismiss this engine from another thread.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            index: self.index,
            dismissed: Arc::clone(&self.dismissed),
            agents: Arc::clone(&self.agents),
        }
    }

    /// Dismiss the engine. See [`EngineHandle::dismiss`].
    pub fn dismiss(&self) {
        self.handle().dismiss();
    }

    /// Whether the engine has been dismissed.
    pub fn is_dismissed(&self) -> bool {
        self.dismissed.load(Ordering::Acquire)
    }

    /// Rights granted by the last request.
    pub fn granted_rights(&self) -> &RightsList {
        &self.granted
    }

    /// Credentials established by this engine.
    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// The durable context promoted from mechanism chains.
    pub fn context(&self) -> &ItemStore {
        &self.context
    }

    /// The working hints.
    pub fn hints(&self) -> &ItemStore {
        &self.hints
    }

    /// The agent cache.
    pub fn agents(&self) -> &AgentCache {
        &self.agents
    }

    /// Record an established credential, plus a shared copy when
    /// `shared` so that write-back can promote it session-wide.
    fn set_credential(&mut self, credential: &Credential, shared: bool) {
        debug!(
            engine = %self.index,
            uid = credential.uid(),
            name = credential.name().unwrap_or(""),
            shared,
            "Credential established"
        );
        self.credentials.insert(credential.clone());
        if shared {
            self.credentials.insert(credential.with_shared(true));
        }
    }

    /// Record a right credential for the right being evaluated.
    fn set_right_credential(&mut self, shared: bool) {
        if let Some(right) = self.current_right.clone() {
            let credential = Credential::create_with_right(right, false);
            self.set_credential(&credential, shared);
        }
    }

    /// The uid the mechanism chain reported, or `UID_NONE` when it is
    /// missing or not a usable user id.
    fn authenticated_uid(&self) -> Uid {
        let uid = self.context.get_uid(hints::CONTEXT_UID);
        if uid == UID_NONE && self.context.exists(hints::CONTEXT_UID) {
            warn!(engine = %self.index, "Ignoring malformed uid in context");
        }
        uid
    }

    fn current_right(&self) -> &str {
        self.current_right.as_deref().unwrap_or("")
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.agents.destroy_all();
        debug!(engine = %self.index, "Engine released");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("index", &self.index)
            .field("token", &self.token.id())
            .field("flags", &self.flags)
            .field("current_rule", &self.current_rule.as_ref().map(|rule| rule.name()))
            .field("granted", &self.granted.len())
            .field("credentials", &self.credentials.len())
            .field("dismissed", &self.is_dismissed())
            .finish()
    }
}
