//! Interfaces to the collaborators the engine consults.
//!
//! The decision core never inspects processes, sessions or accounts
//! directly. Everything it needs to know about the host is asked through
//! these narrow query interfaces, which keeps evaluation testable and keeps
//! platform specifics out of the interpreter.
//!
//! Key traits include:
//!
//! - `ProcessInfo`: Signing status, entitlements and identity of a process
//! - `SessionInfo`: Owner and capabilities of the caller's session
//! - `HostEnvironment`: Host-wide modes that change evaluation
//! - `AccountDirectory`: Account, group and secure-token lookups
//! - `CredentialVerifier`: Username/password verification
//! - `AuditSink`: Destination for per-right decision records

pub mod audit;
pub mod directory;
pub mod process;
pub mod session;

pub use audit::{AuditRecord, AuditSink, RecordingAuditSink, TracingAuditSink};
pub use directory::{
    Account, AccountDirectory, CredentialVerifier, RejectingVerifier, StaticAccount,
    StaticDirectory,
};
pub use process::{ProcessInfo, StaticProcess};
pub use session::{HostEnvironment, SessionInfo, StaticHost, StaticSession};
