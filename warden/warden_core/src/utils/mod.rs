//! Utility modules for configuration and logging.

pub mod config;
pub mod logging;

pub use config::{AgentConfig, EngineConfig, EvaluationConfig, LoggingConfig, MechanismConfig};
pub use logging::LogLevel;
