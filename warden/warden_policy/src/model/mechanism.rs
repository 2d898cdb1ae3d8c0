//! Mechanism descriptors.
//!
//! A mechanism names one step of an authentication procedure as
//! `plugin:param`, optionally followed by `,privileged` when the step must
//! run in the privileged agent host. A small table maps certain
//! `(plugin, param)` pairs to builtin checks that run inside the engine
//! and never start an agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;
use warden_core::error::MechanismError;
use warden_core::utils::MechanismConfig;

/// Plugin name reserved for mechanisms shipped with the engine.
pub const BUILTIN_PLUGIN: &str = "builtin";

/// Suffix of plugin bundles under the search roots.
const BUNDLE_EXTENSION: &str = "bundle";

/// How a mechanism is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    /// Run by an external agent.
    Plugin,

    /// Builtin check: the caller holds the entitlement for the right.
    Entitled,
}

const KIND_TABLE: &[(&str, &str, MechanismKind)] =
    &[(BUILTIN_PLUGIN, "entitled", MechanismKind::Entitled)];

fn kind_for(plugin: &str, param: &str) -> MechanismKind {
    KIND_TABLE
        .iter()
        .find(|(p, q, _)| *p == plugin && *q == param)
        .map(|(_, _, kind)| *kind)
        .unwrap_or(MechanismKind::Plugin)
}

/// A mechanism as stored in a rule database row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismRow {
    /// Plugin name.
    pub plugin: String,

    /// Plugin parameter.
    pub param: String,

    /// Whether the step runs privileged.
    #[serde(default)]
    pub privileged: bool,
}

/// One step of an authentication procedure.
#[derive(Clone)]
pub struct Mechanism {
    plugin: String,
    param: String,
    privileged: bool,
    kind: MechanismKind,
    exists: OnceLock<bool>,
}

impl Mechanism {
    /// Create a mechanism.
    pub fn new(plugin: impl Into<String>, param: impl Into<String>, privileged: bool) -> Self {
        let plugin = plugin.into();
        let param = param.into();
        let kind = kind_for(&plugin, &param);
        Self {
            plugin,
            param,
            privileged,
            kind,
            exists: OnceLock::new(),
        }
    }

    /// Create a mechanism from a database row.
    pub fn from_row(row: &MechanismRow) -> Self {
        Self::new(row.plugin.clone(), row.param.clone(), row.privileged)
    }

    /// Convert back to a database row.
    pub fn to_row(&self) -> MechanismRow {
        MechanismRow {
            plugin: self.plugin.clone(),
            param: self.param.clone(),
            privileged: self.privileged,
        }
    }

    /// Plugin name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Plugin parameter.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// Whether the step runs in the privileged agent host.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// How the mechanism is executed.
    pub fn kind(&self) -> MechanismKind {
        self.kind
    }

    /// Whether the mechanism is evaluated inside the engine.
    pub fn is_builtin_check(&self) -> bool {
        self.kind != MechanismKind::Plugin
    }

    /// Check whether the plugin can be loaded.
    ///
    /// `builtin` mechanisms always exist. Other plugins exist when
    /// `<plugin>.bundle` is present under one of the search roots. The
    /// answer is computed once per mechanism.
    pub fn exists(&self, config: &MechanismConfig) -> bool {
        *self.exists.get_or_init(|| {
            if self.plugin == BUILTIN_PLUGIN {
                return true;
            }
            let bundle = format!("{}.{}", self.plugin, BUNDLE_EXTENSION);
            let found = config
                .search_roots()
                .iter()
                .any(|root| root.join(&bundle).exists());
            if !found {
                debug!(mechanism = %self, "Plugin bundle not found");
            }
            found
        })
    }

    /// Render in `plugin:param[,privileged]` form.
    pub fn descriptor(&self) -> String {
        if self.privileged {
            format!("{}:{},privileged", self.plugin, self.param)
        } else {
            format!("{}:{}", self.plugin, self.param)
        }
    }
}

impl FromStr for Mechanism {
    type Err = MechanismError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MechanismError::Empty);
        }

        let (plugin, rest) = s
            .split_once(':')
            .ok_or_else(|| MechanismError::Malformed(s.to_string()))?;

        let mut parts = rest.split(',');
        let param = parts.next().unwrap_or_default();
        if plugin.is_empty() || param.is_empty() {
            return Err(MechanismError::Malformed(s.to_string()));
        }

        let mut privileged = false;
        for option in parts {
            match option.trim() {
                "privileged" => privileged = true,
                other => return Err(MechanismError::UnknownOption(other.to_string())),
            }
        }

        Ok(Self::new(plugin, param, privileged))
    }
}

impl PartialEq for Mechanism {
    fn eq(&self, other: &Self) -> bool {
        self.plugin == other.plugin
            && self.param == other.param
            && self.privileged == other.privileged
    }
}

impl Eq for Mechanism {}

impl Hash for Mechanism {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.plugin.hash(state);
        self.param.hash(state);
        self.privileged.hash(state);
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.param)
    }
}

impl fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mechanism")
            .field("plugin", &self.plugin)
            .field("param", &self.param)
            .field("privileged", &self.privileged)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_parse_descriptor() {
        let m: Mechanism = "loginwindow:login".parse().unwrap();
        assert_eq!(m.plugin(), "loginwindow");
        assert_eq!(m.param(), "login");
        assert!(!m.is_privileged());
        assert_eq!(m.kind(), MechanismKind::Plugin);

        let m: Mechanism = "builtin:authenticate,privileged".parse().unwrap();
        assert!(m.is_privileged());
        assert_eq!(m.to_string(), "builtin:authenticate");
        assert_eq!(m.descriptor(), "builtin:authenticate,privileged");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Mechanism>(), Err(MechanismError::Empty));
        assert!(matches!(
            "nocolon".parse::<Mechanism>(),
            Err(MechanismError::Malformed(_))
        ));
        assert!(matches!(
            ":param".parse::<Mechanism>(),
            Err(MechanismError::Malformed(_))
        ));
        assert_eq!(
            "a:b,loud".parse::<Mechanism>(),
            Err(MechanismError::UnknownOption("loud".into()))
        );
    }

    #[test]
    fn test_builtin_kind_table() {
        let m: Mechanism = "builtin:entitled".parse().unwrap();
        assert_eq!(m.kind(), MechanismKind::Entitled);
        assert!(m.is_builtin_check());

        let m: Mechanism = "builtin:authenticate".parse().unwrap();
        assert_eq!(m.kind(), MechanismKind::Plugin);
    }

    #[test]
    fn test_identity_excludes_kind_and_memo() {
        let a: Mechanism = "p:q".parse().unwrap();
        let b = Mechanism::from_row(&MechanismRow {
            plugin: "p".into(),
            param: "q".into(),
            privileged: false,
        });
        assert_eq!(a, b);
        assert_ne!(a, Mechanism::new("p", "q", true));
        assert_eq!(b.to_row().plugin, "p");
    }

    #[test]
    fn test_exists_searches_roots_and_memoizes() {
        let local = TempDir::new().unwrap();
        let config = MechanismConfig {
            system_dir: PathBuf::from("/nonexistent/warden"),
            local_dir: local.path().to_path_buf(),
            ..MechanismConfig::default()
        };

        let builtin: Mechanism = "builtin:anything".parse().unwrap();
        assert!(builtin.exists(&config));

        let missing: Mechanism = "vendor:step".parse().unwrap();
        assert!(!missing.exists(&config));

        std::fs::create_dir(local.path().join("vendor.bundle")).unwrap();
        // Memoized: the first answer sticks.
        assert!(!missing.exists(&config));

        let fresh: Mechanism = "vendor:step".parse().unwrap();
        assert!(fresh.exists(&config));
    }
}
