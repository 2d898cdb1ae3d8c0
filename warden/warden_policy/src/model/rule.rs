//! Rule model.
//!
//! A [`Rule`] is an immutable snapshot of one rule database record.
//! Evaluation never mutates rules; everything that changes while a right
//! is evaluated lives on the engine.
//!
//! Rules are written as [`RuleDefinition`]s, which is also the form used
//! for TOML rule files:
//!
//! ```toml
//! [rules."system.privilege.admin"]
//! class = "user"
//! group = "admin"
//! timeout = 300
//! tries = 3
//! shared = true
//! authenticate_user = true
//!
//! [rules."system.preferences"]
//! class = "rule"
//! delegates = ["is-admin", "is-owner"]
//! kofn = 1
//! ```

use super::mechanism::Mechanism;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use warden_core::error::{RuleError, Result};

/// Name of the rule whose mechanisms authenticate USER rules that list
/// none of their own.
pub const AUTHENTICATE_RULE: &str = "authenticate";

/// Timeout meaning "never expires".
const NO_TIMEOUT: i64 = i32::MAX as i64;

/// The class of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleClass {
    /// Always grants.
    Allow,

    /// Always refuses.
    Deny,

    /// Grants to an accepted user credential.
    User,

    /// Delegates to other rules.
    Rule,

    /// Runs a mechanism chain.
    Mechanism,

    /// Not a usable class.
    Invalid,
}

impl RuleClass {
    /// Get the name of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::User => "user",
            Self::Rule => "rule",
            Self::Mechanism => "mechanism",
            Self::Invalid => "invalid",
        }
    }
}

impl FromStr for RuleClass {
    type Err = RuleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "user" => Ok(Self::User),
            "rule" => Ok(Self::Rule),
            "evaluate-mechanisms" | "mechanism" => Ok(Self::Mechanism),
            other => Err(RuleError::UnknownClass(other.to_string())),
        }
    }
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

bitflags! {
    /// Behavioural switches of a rule.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RuleFlags: u32 {
        /// Credentials acquired under this rule may be shared session-wide.
        const SHARED                  = 1 << 0;

        /// Root callers are granted without authentication.
        const ALLOW_ROOT              = 1 << 1;

        /// The session owner satisfies the rule.
        const SESSION_OWNER           = 1 << 2;

        /// A user must authenticate; held credentials alone do not do.
        const AUTHENTICATE_USER       = 1 << 3;

        /// The password may be extracted by an entitled caller.
        const EXTRACT_PASSWORD        = 1 << 4;

        /// Callers entitled to the right are granted outright.
        const ENTITLED                = 1 << 5;

        /// Entitled callers in the rule's group are granted.
        const ENTITLED_AND_GROUP      = 1 << 6;

        /// VPN-entitled callers in the rule's group are granted.
        const VPN_ENTITLED_AND_GROUP  = 1 << 7;

        /// Only platform-signed callers may be granted.
        const REQUIRE_PLATFORM_SIGNED = 1 << 8;

        /// Agents should ask for a password only.
        const PASSWORD_ONLY           = 1 << 9;

        /// The authenticating user must hold a secure token.
        const REQUIRE_SECURE_TOKEN    = 1 << 10;

        /// The restricted low-power state does not block this rule.
        const IGNORE_LOW_POWER        = 1 << 11;
    }
}

/// An immutable rule record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    name: String,
    class: RuleClass,
    mechanisms: Vec<Mechanism>,
    delegates: Vec<String>,
    flags: RuleFlags,
    timeout: i64,
    tries: u32,
    kofn: u32,
    group: Option<String>,
    description: Option<String>,
}

impl Rule {
    /// Create a rule of the given class with default settings.
    pub fn new(name: impl Into<String>, class: RuleClass) -> Self {
        Self {
            name: name.into(),
            class,
            mechanisms: Vec::new(),
            delegates: Vec::new(),
            flags: RuleFlags::empty(),
            timeout: NO_TIMEOUT,
            tries: default_tries(),
            kofn: 0,
            group: None,
            description: None,
        }
    }

    /// The rule used when neither the requested name, any of its
    /// prefixes, nor the empty-name rule exist.
    ///
    /// Requires an admin to authenticate; the credential is shared and
    /// lasts five minutes.
    pub fn builtin_default() -> Self {
        Self::new("", RuleClass::User)
            .with_group("admin")
            .with_timeout(300)
            .with_tries(default_tries())
            .with_flags(RuleFlags::SHARED | RuleFlags::AUTHENTICATE_USER)
            .with_description("Builtin default rule")
    }

    /// Set the mechanisms.
    pub fn with_mechanisms(mut self, mechanisms: Vec<Mechanism>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Set the delegate rule names.
    pub fn with_delegates<S: Into<String>>(mut self, delegates: impl IntoIterator<Item = S>) -> Self {
        self.delegates = delegates.into_iter().map(Into::into).collect();
        self
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: RuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the credential timeout in seconds.
    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the try count.
    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    /// Set the k-of-n threshold.
    pub fn with_kofn(mut self, kofn: u32) -> Self {
        self.kofn = kofn;
        self
    }

    /// Set the required group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rule class.
    pub fn class(&self) -> RuleClass {
        self.class
    }

    /// Ordered mechanisms.
    pub fn mechanisms(&self) -> &[Mechanism] {
        &self.mechanisms
    }

    /// Ordered delegate rule names.
    pub fn delegates(&self) -> &[String] {
        &self.delegates
    }

    /// Flags.
    pub fn flags(&self) -> RuleFlags {
        self.flags
    }

    /// Whether all of `flags` are set.
    pub fn check_flags(&self, flags: RuleFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Credential timeout in seconds.
    pub fn timeout(&self) -> i64 {
        self.timeout
    }

    /// Try count.
    ///
    /// Zero means unbounded for mechanism rules. User rules loaded from a
    /// definition always have at least one try; a user rule built with zero
    /// tries never prompts and denies.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// K-of-n threshold. Zero means every delegate must succeed.
    pub fn kofn(&self) -> u32 {
        self.kofn
    }

    /// Required group.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Description shown to the user.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether any mechanism runs unprivileged.
    pub fn has_unprivileged_mechanism(&self) -> bool {
        self.mechanisms.iter().any(|m| !m.is_privileged())
    }

    /// Build a rule from its definition.
    ///
    /// # Arguments
    ///
    /// * `name` - The rule name.
    /// * `definition` - The stored definition.
    ///
    /// # Returns
    ///
    /// The rule, or `RuleError::InvalidDefinition` if a mechanism does not
    /// parse or the delegation settings are inconsistent.
    pub fn from_definition(name: impl Into<String>, definition: &RuleDefinition) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| RuleError::InvalidDefinition {
            name: name.clone(),
            reason,
        };

        let mechanisms = definition
            .mechanisms
            .iter()
            .map(|m| m.parse::<Mechanism>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;

        match definition.class {
            RuleClass::Rule if definition.delegates.is_empty() => {
                return Err(invalid("rule class requires delegates".into()).into());
            }
            RuleClass::Mechanism if mechanisms.is_empty() => {
                return Err(invalid("mechanism class requires mechanisms".into()).into());
            }
            RuleClass::User if definition.tries == 0 => {
                return Err(invalid("user class requires at least one try".into()).into());
            }
            _ => {}
        }

        if definition.kofn as usize > definition.delegates.len() {
            return Err(invalid(format!(
                "kofn {} exceeds {} delegates",
                definition.kofn,
                definition.delegates.len()
            ))
            .into());
        }

        let mut rule = Rule::new(name.clone(), definition.class)
            .with_mechanisms(mechanisms)
            .with_delegates(definition.delegates.iter().cloned())
            .with_flags(definition.flags())
            .with_timeout(definition.timeout)
            .with_tries(definition.tries)
            .with_kofn(definition.kofn);
        rule.group = definition.group.clone();
        rule.description = definition.description.clone();
        Ok(rule)
    }

    /// Convert back to a definition.
    pub fn to_definition(&self) -> RuleDefinition {
        let f = self.flags;
        RuleDefinition {
            class: self.class,
            mechanisms: self.mechanisms.iter().map(Mechanism::descriptor).collect(),
            delegates: self.delegates.clone(),
            kofn: self.kofn,
            tries: self.tries,
            timeout: self.timeout,
            group: self.group.clone(),
            description: self.description.clone(),
            shared: f.contains(RuleFlags::SHARED),
            allow_root: f.contains(RuleFlags::ALLOW_ROOT),
            session_owner: f.contains(RuleFlags::SESSION_OWNER),
            authenticate_user: f.contains(RuleFlags::AUTHENTICATE_USER),
            extract_password: f.contains(RuleFlags::EXTRACT_PASSWORD),
            entitled: f.contains(RuleFlags::ENTITLED),
            entitled_and_group: f.contains(RuleFlags::ENTITLED_AND_GROUP),
            vpn_entitled_and_group: f.contains(RuleFlags::VPN_ENTITLED_AND_GROUP),
            require_platform_signed: f.contains(RuleFlags::REQUIRE_PLATFORM_SIGNED),
            password_only: f.contains(RuleFlags::PASSWORD_ONLY),
            require_secure_token: f.contains(RuleFlags::REQUIRE_SECURE_TOKEN),
            ignore_low_power: f.contains(RuleFlags::IGNORE_LOW_POWER),
        }
    }
}

fn default_tries() -> u32 {
    3
}

fn default_timeout() -> i64 {
    NO_TIMEOUT
}

/// The stored form of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Rule class.
    pub class: RuleClass,

    /// Mechanisms in `plugin:param[,privileged]` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mechanisms: Vec<String>,

    /// Delegate rule names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegates: Vec<String>,

    /// K-of-n threshold.
    #[serde(default)]
    pub kofn: u32,

    /// Try count.
    #[serde(default = "default_tries")]
    pub tries: u32,

    /// Credential timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    /// Required group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// See [`RuleFlags::SHARED`].
    #[serde(default)]
    pub shared: bool,

    /// See [`RuleFlags::ALLOW_ROOT`].
    #[serde(default)]
    pub allow_root: bool,

    /// See [`RuleFlags::SESSION_OWNER`].
    #[serde(default)]
    pub session_owner: bool,

    /// See [`RuleFlags::AUTHENTICATE_USER`].
    #[serde(default)]
    pub authenticate_user: bool,

    /// See [`RuleFlags::EXTRACT_PASSWORD`].
    #[serde(default)]
    pub extract_password: bool,

    /// See [`RuleFlags::ENTITLED`].
    #[serde(default)]
    pub entitled: bool,

    /// See [`RuleFlags::ENTITLED_AND_GROUP`].
    #[serde(default)]
    pub entitled_and_group: bool,

    /// See [`RuleFlags::VPN_ENTITLED_AND_GROUP`].
    #[serde(default)]
    pub vpn_entitled_and_group: bool,

    /// See [`RuleFlags::REQUIRE_PLATFORM_SIGNED`].
    #[serde(default)]
    pub require_platform_signed: bool,

    /// See [`RuleFlags::PASSWORD_ONLY`].
    #[serde(default)]
    pub password_only: bool,

    /// See [`RuleFlags::REQUIRE_SECURE_TOKEN`].
    #[serde(default)]
    pub require_secure_token: bool,

    /// See [`RuleFlags::IGNORE_LOW_POWER`].
    #[serde(default)]
    pub ignore_low_power: bool,
}

impl RuleDefinition {
    /// Collect the boolean switches into flags.
    pub fn flags(&self) -> RuleFlags {
        let mut flags = RuleFlags::empty();
        flags.set(RuleFlags::SHARED, self.shared);
        flags.set(RuleFlags::ALLOW_ROOT, self.allow_root);
        flags.set(RuleFlags::SESSION_OWNER, self.session_owner);
        flags.set(RuleFlags::AUTHENTICATE_USER, self.authenticate_user);
        flags.set(RuleFlags::EXTRACT_PASSWORD, self.extract_password);
        flags.set(RuleFlags::ENTITLED, self.entitled);
        flags.set(RuleFlags::ENTITLED_AND_GROUP, self.entitled_and_group);
        flags.set(RuleFlags::VPN_ENTITLED_AND_GROUP, self.vpn_entitled_and_group);
        flags.set(RuleFlags::REQUIRE_PLATFORM_SIGNED, self.require_platform_signed);
        flags.set(RuleFlags::PASSWORD_ONLY, self.password_only);
        flags.set(RuleFlags::REQUIRE_SECURE_TOKEN, self.require_secure_token);
        flags.set(RuleFlags::IGNORE_LOW_POWER, self.ignore_low_power);
        flags
    }
}
