//! Error types for the Warden authorization engine.
//!
//! Authorization outcomes are not errors: a denied right is an
//! [`AuthStatus`](crate::types::AuthStatus), not an `Err`. The types here
//! cover the failures around evaluation: configuration that cannot be
//! loaded, unusable rule data, and broken agent transports.
//!
//! The root error type, `Error`, can wrap any of the subsystem-specific
//! errors, allowing for uniform error handling at the top level.

use thiserror::Error;

/// Root error type for the Warden system.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rule database errors
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Mechanism descriptor errors
    #[error("Mechanism error: {0}")]
    Mechanism(#[from] MechanismError),

    /// Agent transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An execution context could not be started
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source could not be read
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    /// The configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// The configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors related to the rule database.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule with the given name was not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Rule class string is not recognised
    #[error("Unknown rule class: {0}")]
    UnknownClass(String),

    /// Rule definition is malformed
    #[error("Invalid rule '{name}': {reason}")]
    InvalidDefinition {
        /// Name of the offending rule
        name: String,

        /// What is wrong with it
        reason: String,
    },

    /// The rule store cannot be reached
    #[error("Rule store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Errors related to mechanism descriptors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MechanismError {
    /// The mechanism string was empty
    #[error("Empty mechanism descriptor")]
    Empty,

    /// The descriptor has no `plugin:param` separator
    #[error("Mechanism '{0}' is missing a plugin or parameter")]
    Malformed(String),

    /// The descriptor carries an option other than `privileged`
    #[error("Unknown mechanism option: {0}")]
    UnknownOption(String),
}

/// Errors related to the agent IPC transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The agent service could not be reached
    #[error("Failed to connect to agent service: {0}")]
    ConnectFailed(String),

    /// A message could not be delivered
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// The channel was closed by the peer or locally
    #[error("Channel closed")]
    Closed,

    /// The peer sent something that does not fit the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A reply arrived for a different request kind than the one pending
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        /// Kind of the outstanding request
        expected: String,

        /// Kind of the reply received
        actual: String,
    },

    /// An out-of-band value reference does not match its attachment
    #[error("Out-of-band value '{name}' is invalid: {reason}")]
    InvalidAttachment {
        /// Item name carrying the reference
        name: String,

        /// What did not match
        reason: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type used throughout the Warden system.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = RuleError::NotFound("system.privilege".into()).into();
        assert!(matches!(err, Error::Rule(RuleError::NotFound(_))));

        let err: Error = TransportError::Closed.into();
        assert!(matches!(err, Error::Transport(TransportError::Closed)));

        let err: Error = MechanismError::Empty.into();
        assert!(matches!(err, Error::Mechanism(_)));
    }

    #[test]
    fn test_error_display() {
        let err: Error = RuleError::InvalidDefinition {
            name: "a.b".into(),
            reason: "kofn exceeds delegate count".into(),
        }
        .into();
        let display = err.to_string();
        assert!(display.contains("Invalid rule 'a.b'"));
        assert!(display.contains("kofn exceeds delegate count"));

        let err = TransportError::UnexpectedReply {
            expected: "invoke".into(),
            actual: "create".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected reply: expected invoke, got create"
        );
    }
}
