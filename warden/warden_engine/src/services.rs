//! Collaborators consulted during evaluation.

use std::fmt;
use std::sync::Arc;
use warden_agent::AgentConnector;
use warden_core::traits::{
    AccountDirectory, AuditSink, CredentialVerifier, HostEnvironment, StaticHost, TracingAuditSink,
};
use warden_core::utils::EngineConfig;
use warden_policy::RuleSource;

/// Everything an [`Engine`](crate::Engine) needs from outside the request.
///
/// Services are shared between engines; cloning is cheap.
#[derive(Clone)]
pub struct EngineServices {
    /// Rule database
    pub rules: Arc<dyn RuleSource>,

    /// Account, group and secure-token lookups
    pub directory: Arc<dyn AccountDirectory>,

    /// Verifies credentials passed in the environment
    pub verifier: Arc<dyn CredentialVerifier>,

    /// Host-wide modes
    pub host: Arc<dyn HostEnvironment>,

    /// Destination for per-right decisions
    pub audit: Arc<dyn AuditSink>,

    /// Transport to authentication agents
    pub connector: Arc<dyn AgentConnector>,

    /// Engine configuration
    pub config: Arc<EngineConfig>,
}

impl EngineServices {
    /// Create services with a normal host, tracing audit output and the
    /// default configuration.
    pub fn new(
        rules: Arc<dyn RuleSource>,
        directory: Arc<dyn AccountDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        connector: Arc<dyn AgentConnector>,
    ) -> Self {
        Self {
            rules,
            directory,
            verifier,
            host: Arc::new(StaticHost::default()),
            audit: Arc::new(TracingAuditSink),
            connector,
            config: Arc::new(EngineConfig::default()),
        }
    }

    /// Replace the host environment.
    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = host;
        self
    }

    /// Replace the audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

impl fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineServices")
            .field("directory", &self.directory)
            .field("host", &self.host)
            .field("connector", &self.connector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
