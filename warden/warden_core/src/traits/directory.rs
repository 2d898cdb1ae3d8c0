//! Account directory and credential verification.

use crate::types::Uid;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use zeroize::Zeroizing;

/// An account as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// User id.
    pub uid: Uid,

    /// Short name.
    pub name: String,

    /// Full name.
    pub real_name: String,

    /// Whether the password hash is locked.
    pub locked: bool,
}

/// Account, group and secure-token lookups.
pub trait AccountDirectory: Send + Sync + Debug {
    /// Resolve a uid.
    fn lookup_uid(&self, uid: Uid) -> Option<Account>;

    /// Resolve a short name.
    fn lookup_name(&self, name: &str) -> Option<Account>;

    /// Whether the user is a member of `group`.
    fn is_member(&self, user: &str, group: &str) -> bool;

    /// Whether the user holds a secure token.
    fn has_secure_token(&self, uid: Uid) -> bool;

    /// Whether the user may unlock the system volume.
    fn is_volume_owner(&self, uid: Uid) -> bool;
}

/// Username/password verification.
pub trait CredentialVerifier: Send + Sync + Debug {
    /// Verify `password` for `user`.
    fn verify(&self, user: &str, password: &[u8]) -> bool;
}

/// A verifier that rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectingVerifier;

impl CredentialVerifier for RejectingVerifier {
    fn verify(&self, _user: &str, _password: &[u8]) -> bool {
        false
    }
}

/// An account entry of a [`StaticDirectory`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticAccount {
    /// User id.
    pub uid: Uid,

    /// Short name.
    pub name: String,

    /// Full name.
    pub real_name: String,

    /// Whether the account is locked.
    pub locked: bool,

    /// Group memberships.
    pub groups: Vec<String>,

    /// Whether the account holds a secure token.
    pub secure_token: bool,

    /// Whether the account may unlock the system volume.
    pub volume_owner: bool,

    /// Password accepted by the verifier side, if any.
    #[serde(skip_serializing)]
    pub password: Option<Zeroizing<String>>,
}

impl Debug for StaticAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAccount")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("locked", &self.locked)
            .field("groups", &self.groups)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl StaticAccount {
    fn to_account(&self) -> Account {
        Account {
            uid: self.uid,
            name: self.name.clone(),
            real_name: self.real_name.clone(),
            locked: self.locked,
        }
    }
}

/// A fixed account table, usable as both directory and verifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticDirectory {
    /// Known accounts.
    pub accounts: Vec<StaticAccount>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account.
    pub fn with_account(mut self, account: StaticAccount) -> Self {
        self.accounts.push(account);
        self
    }

    fn by_uid(&self, uid: Uid) -> Option<&StaticAccount> {
        self.accounts.iter().find(|a| a.uid == uid)
    }

    fn by_name(&self, name: &str) -> Option<&StaticAccount> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

impl AccountDirectory for StaticDirectory {
    fn lookup_uid(&self, uid: Uid) -> Option<Account> {
        self.by_uid(uid).map(StaticAccount::to_account)
    }

    fn lookup_name(&self, name: &str) -> Option<Account> {
        self.by_name(name).map(StaticAccount::to_account)
    }

    fn is_member(&self, user: &str, group: &str) -> bool {
        self.by_name(user)
            .is_some_and(|a| a.groups.iter().any(|g| g == group))
    }

    fn has_secure_token(&self, uid: Uid) -> bool {
        self.by_uid(uid).is_some_and(|a| a.secure_token)
    }

    fn is_volume_owner(&self, uid: Uid) -> bool {
        self.by_uid(uid).is_some_and(|a| a.volume_owner)
    }
}

impl CredentialVerifier for StaticDirectory {
    fn verify(&self, user: &str, password: &[u8]) -> bool {
        match self.by_name(user).and_then(|a| a.password.as_ref()) {
            Some(expected) => expected.as_bytes() == password,
            None => false,
        }
    }
}
