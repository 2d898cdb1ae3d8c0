//! Credentials.
//!
//! A [`Credential`] records that an identity has been established. Most
//! credentials name a user by uid. In least-privilege mode the engine
//! instead records *right credentials*, which name a single right that was
//! granted and carry the sentinel uid [`UID_RIGHT`].
//!
//! Two credentials are interchangeable when their identity and shared flag
//! agree. Everything else (names, creation time, the membership cache) is
//! descriptive and does not take part in equality or hashing.

use super::{Uid, UID_NONE, UID_RIGHT};
use crate::traits::{AccountDirectory, HostEnvironment};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// First uid treated as a regular user account.
const FIRST_REGULAR_UID: Uid = 500;

/// What a credential vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialIdentity {
    /// A user.
    Uid(Uid),

    /// A single granted right.
    Right(String),
}

/// Proof that an identity or right has been established.
#[derive(Debug)]
pub struct Credential {
    identity: CredentialIdentity,
    name: Option<String>,
    real_name: Option<String>,
    shared: bool,
    valid: bool,
    created_at: DateTime<Utc>,
    memberships: Mutex<HashSet<String>>,
}

impl Credential {
    /// Create a user credential for `uid`.
    ///
    /// # Arguments
    ///
    /// * `uid` - The user id. [`UID_NONE`] yields an invalid credential.
    /// * `shared` - Whether the credential may be shared session-wide.
    /// * `directory` - Used to resolve the uid to an account.
    ///
    /// # Returns
    ///
    /// A credential that is valid only if the uid resolved to an account
    /// that is not locked. Locked regular accounts keep their name.
    pub fn create(uid: Uid, shared: bool, directory: &dyn AccountDirectory) -> Self {
        let mut credential = Self::blank(CredentialIdentity::Uid(uid), shared);
        if uid == UID_NONE {
            return credential;
        }

        if let Some(account) = directory.lookup_uid(uid) {
            credential.valid = !(account.locked && uid >= FIRST_REGULAR_UID);
            credential.name = Some(account.name);
            credential.real_name = Some(account.real_name);
        }
        credential
    }

    /// Create a right credential for `right`. Always valid.
    pub fn create_with_right(right: impl Into<String>, shared: bool) -> Self {
        let right = right.into();
        let mut credential = Self::blank(CredentialIdentity::Right(right.clone()), shared);
        credential.name = Some(right);
        credential.valid = true;
        credential
    }

    fn blank(identity: CredentialIdentity, shared: bool) -> Self {
        Self {
            identity,
            name: None,
            real_name: None,
            shared,
            valid: false,
            created_at: Utc::now(),
            memberships: Mutex::new(HashSet::new()),
        }
    }

    /// Copy this credential with a different shared flag.
    pub fn with_shared(&self, shared: bool) -> Self {
        let mut copy = self.clone();
        copy.shared = shared;
        copy
    }

    /// Override the creation time.
    pub fn with_creation_time(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Get the identity.
    pub fn identity(&self) -> &CredentialIdentity {
        &self.identity
    }

    /// Get the uid. Right credentials report [`UID_RIGHT`].
    pub fn uid(&self) -> Uid {
        match self.identity {
            CredentialIdentity::Uid(uid) => uid,
            CredentialIdentity::Right(_) => UID_RIGHT,
        }
    }

    /// Whether this is a right credential.
    pub fn is_right(&self) -> bool {
        matches!(self.identity, CredentialIdentity::Right(_))
    }

    /// Account short name, or right name for right credentials.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Account full name.
    pub fn real_name(&self) -> Option<&str> {
        self.real_name.as_deref()
    }

    /// Whether the credential may be shared session-wide.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether the identity resolved to a usable account.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// When the credential was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Seconds elapsed between creation and `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Check whether the credential's user belongs to `group`.
    ///
    /// Positive answers are cached on this credential. Right credentials,
    /// root and the right sentinel are never members, and no membership is
    /// reported while the host is in volume unlock mode.
    pub fn check_membership(
        &self,
        group: &str,
        directory: &dyn AccountDirectory,
        host: &dyn HostEnvironment,
    ) -> bool {
        if host.in_volume_unlock_mode() {
            return false;
        }

        let uid = self.uid();
        if self.is_right() || uid == 0 || uid == UID_RIGHT {
            return false;
        }

        if self.memberships.lock().contains(group) {
            return true;
        }

        let Some(name) = self.name.as_deref() else {
            return false;
        };

        let member = directory.is_member(name, group);
        if member {
            self.memberships.lock().insert(group.to_string());
        }
        member
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            name: self.name.clone(),
            real_name: self.real_name.clone(),
            shared: self.shared,
            valid: self.valid,
            created_at: self.created_at,
            memberships: Mutex::new(self.memberships.lock().clone()),
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.shared == other.shared
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.shared.hash(state);
    }
}

/// An ordered set of credentials.
///
/// Inserting a credential equal to one already present replaces it in
/// place, so the newest copy wins without reordering.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    credentials: Vec<Credential>,
}

impl CredentialSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a credential.
    pub fn insert(&mut self, credential: Credential) {
        match self.credentials.iter_mut().find(|c| **c == credential) {
            Some(existing) => *existing = credential,
            None => self.credentials.push(credential),
        }
    }

    /// Whether an equal credential is present.
    pub fn contains(&self, credential: &Credential) -> bool {
        self.credentials.iter().any(|c| c == credential)
    }

    /// Insert every credential of `other`.
    pub fn extend_from(&mut self, other: &CredentialSet) {
        for credential in other.iter() {
            self.insert(credential.clone());
        }
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// Number of credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Remove every credential.
    pub fn clear(&mut self) {
        self.credentials.clear();
    }
}
