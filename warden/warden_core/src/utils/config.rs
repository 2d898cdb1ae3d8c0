//! Configuration for the Warden engine.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration.
//!
//! ```toml
//! [mechanisms]
//! system_dir = "/usr/lib/warden/plugins"
//! local_dir = "/usr/local/lib/warden/plugins"
//!
//! [agent]
//! create_retry_limit = 8
//!
//! [engine]
//! max_rule_depth = 16
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{ConfigError, Result};
use crate::utils::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Mechanism plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismConfig {
    /// Plugin root shipped with the system.
    #[serde(default = "default_system_dir")]
    pub system_dir: PathBuf,

    /// Plugin root for locally installed plugins.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Mechanisms skipped when credentials were passed in the environment.
    #[serde(default = "default_skip_with_preset_credentials")]
    pub skip_with_preset_credentials: Vec<String>,
}

fn default_system_dir() -> PathBuf {
    PathBuf::from("/usr/lib/warden/plugins")
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("/usr/local/lib/warden/plugins")
}

fn default_skip_with_preset_credentials() -> Vec<String> {
    vec!["builtin:authenticate".to_string()]
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            system_dir: default_system_dir(),
            local_dir: default_local_dir(),
            skip_with_preset_credentials: default_skip_with_preset_credentials(),
        }
    }
}

impl MechanismConfig {
    /// The plugin search roots, system first.
    pub fn search_roots(&self) -> [&Path; 2] {
        [self.system_dir.as_path(), self.local_dir.as_path()]
    }
}

/// Agent transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on CREATE attempts interrupted by the agent service.
    #[serde(default = "default_create_retry_limit")]
    pub create_retry_limit: u32,

    /// Directory holding agent executables for the process transport.
    #[serde(default = "default_executable_dir")]
    pub executable_dir: PathBuf,
}

fn default_create_retry_limit() -> u32 {
    16
}

fn default_executable_dir() -> PathBuf {
    PathBuf::from("/usr/libexec/warden")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            create_retry_limit: default_create_retry_limit(),
            executable_dir: default_executable_dir(),
        }
    }
}

/// Rule evaluation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Maximum nesting of delegate rules.
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,

    /// Whether the platform-signed requirement is enforced.
    #[serde(default = "default_enforce_platform_signing")]
    pub enforce_platform_signing: bool,
}

fn default_max_rule_depth() -> usize {
    32
}

fn default_enforce_platform_signing() -> bool {
    !cfg!(debug_assertions)
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_rule_depth: default_max_rule_depth(),
            enforce_platform_signing: default_enforce_platform_signing(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level.
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON lines instead of text.
    #[serde(default)]
    pub json: bool,
}

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Mechanism plugins
    #[serde(default)]
    pub mechanisms: MechanismConfig,

    /// Agent transport
    #[serde(default)]
    pub agent: AgentConfig,

    /// Rule evaluation
    #[serde(default)]
    pub engine: EvaluationConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a file.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to a TOML file. A missing file is not an
    ///   error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::LoadFailed(format!("{}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            Some(path) => {
                warn!("Configuration file not found: {}", path.display());
                Self::default()
            }
            None => {
                info!("No configuration file specified, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_rule_depth == 0 {
            return Err(ConfigError::Invalid("max_rule_depth cannot be zero".to_string()).into());
        }

        if self.agent.create_retry_limit == 0 {
            return Err(
                ConfigError::Invalid("create_retry_limit cannot be zero".to_string()).into(),
            );
        }

        if self.mechanisms.system_dir == self.mechanisms.local_dir {
            warn!("Mechanism search roots are identical");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.agent.create_retry_limit, 16);
        assert_eq!(config.engine.max_rule_depth, 32);
        assert_eq!(
            config.mechanisms.skip_with_preset_credentials,
            vec!["builtin:authenticate".to_string()]
        );
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [engine]
            max_rule_depth = 4

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_rule_depth, 4);
        assert_eq!(config.logging.level, LogLevel::Warning);
        assert_eq!(config.agent.create_retry_limit, 16);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_toml_str("[engine]\nmax_rule_depth = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_rule_depth"));

        let err = EngineConfig::from_toml_str("[engine\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[mechanisms]\nsystem_dir = \"/opt/plugins\"").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.mechanisms.system_dir, PathBuf::from("/opt/plugins"));

        let missing = EngineConfig::load(Some(Path::new("/nonexistent/warden.toml"))).unwrap();
        assert_eq!(missing, EngineConfig::default());
    }
}
