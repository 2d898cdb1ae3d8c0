//! Authorization tokens and sessions.
//!
//! An [`AuthToken`] is the caller-visible authorization handle. It records
//! which process asked, the credentials it has accumulated and the context
//! values it is allowed to extract. Tokens belong to a [`Session`], whose
//! credential set is shared by every token in it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use warden_core::id::TokenId;
use warden_core::traits::{AccountDirectory, ProcessInfo, SessionInfo};
use warden_core::types::{Credential, CredentialSet, ItemStore, Uid};

/// A security session.
pub struct Session {
    info: Arc<dyn SessionInfo>,
    credentials: Mutex<CredentialSet>,
}

impl Session {
    /// Create a session with no shared credentials.
    pub fn new(info: Arc<dyn SessionInfo>) -> Self {
        Self {
            info,
            credentials: Mutex::new(CredentialSet::new()),
        }
    }

    /// Session facts.
    pub fn info(&self) -> &dyn SessionInfo {
        self.info.as_ref()
    }

    /// Uid of the session owner.
    pub fn owner_uid(&self) -> Uid {
        self.info.owner_uid()
    }

    /// A credential for the session owner.
    pub fn owner_credential(&self, directory: &dyn AccountDirectory) -> Credential {
        Credential::create(self.owner_uid(), false, directory)
    }

    /// Snapshot the session-wide credentials.
    pub fn credentials(&self) -> CredentialSet {
        self.credentials.lock().clone()
    }

    /// Add a shared copy of `credential` to the session-wide set.
    pub fn set_credential(&self, credential: &Credential) {
        self.credentials.lock().insert(credential.with_shared(true));
    }

    /// Drop every session-wide credential.
    pub fn clear_credentials(&self) {
        self.credentials.lock().clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info)
            .field("credentials", &self.credentials.lock().len())
            .finish()
    }
}

/// An authorization handle held by a client.
pub struct AuthToken {
    id: TokenId,
    process: Arc<dyn ProcessInfo>,
    creator: Arc<dyn ProcessInfo>,
    session: Arc<Session>,
    least_privileged: bool,
    credentials: Mutex<CredentialSet>,
    context: Mutex<ItemStore>,
}

impl AuthToken {
    /// Create a token for `process`, which is also its creator.
    pub fn new(process: Arc<dyn ProcessInfo>, session: Arc<Session>) -> Self {
        Self {
            id: TokenId::new(),
            creator: Arc::clone(&process),
            process,
            session,
            least_privileged: false,
            credentials: Mutex::new(CredentialSet::new()),
            context: Mutex::new(ItemStore::new()),
        }
    }

    /// Record a different creating process.
    pub fn with_creator(mut self, creator: Arc<dyn ProcessInfo>) -> Self {
        self.creator = creator;
        self
    }

    /// Track granted rights as right credentials instead of user
    /// credentials.
    pub fn with_least_privilege(mut self, least_privileged: bool) -> Self {
        self.least_privileged = least_privileged;
        self
    }

    /// Token id.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// The process using the token.
    pub fn process(&self) -> &dyn ProcessInfo {
        self.process.as_ref()
    }

    /// The process that created the token.
    pub fn creator(&self) -> &dyn ProcessInfo {
        self.creator.as_ref()
    }

    /// The owning session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Uid of the process using the token.
    pub fn uid(&self) -> Uid {
        self.process.uid()
    }

    /// Whether the token runs in least-privilege mode.
    pub fn is_least_privileged(&self) -> bool {
        self.least_privileged
    }

    /// Snapshot the token's credentials.
    pub fn credentials(&self) -> CredentialSet {
        self.credentials.lock().clone()
    }

    /// Store a credential on the token.
    pub fn set_credential(&self, credential: &Credential) {
        self.credentials.lock().insert(credential.clone());
    }

    /// Snapshot the extractable context.
    pub fn context(&self) -> ItemStore {
        self.context.lock().clone()
    }

    /// Merge items into the extractable context.
    pub fn update_context(&self, items: &ItemStore) {
        self.context.lock().copy(items);
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("id", &self.id)
            .field("pid", &self.process.pid())
            .field("creator_pid", &self.creator.pid())
            .field("least_privileged", &self.least_privileged)
            .field("credentials", &self.credentials.lock().len())
            .finish()
    }
}
