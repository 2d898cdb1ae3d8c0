//! Decision auditing.

use crate::id::EngineIndex;
use crate::types::AuthStatus;
use parking_lot::Mutex;
use std::fmt::Debug;
use tracing::info;

/// The outcome of evaluating one right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Engine that made the decision.
    pub engine: EngineIndex,

    /// Requested right.
    pub right: String,

    /// Rule the right resolved to.
    pub rule: String,

    /// Decision.
    pub status: AuthStatus,

    /// Pid of the requesting process.
    pub client_pid: i32,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync + Debug {
    /// Record one decision.
    fn record(&self, record: &AuditRecord);
}

/// Writes audit records to the `warden::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        info!(
            target: "warden::audit",
            engine = %record.engine,
            right = %record.right,
            rule = %record.rule,
            status = %record.status,
            client_pid = record.client_pid,
            "authorization decision"
        );
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the records collected so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingAuditSink::new();
        let record = AuditRecord {
            engine: EngineIndex::next(),
            right: "system.login".into(),
            rule: "allow".into(),
            status: AuthStatus::Allow,
            client_pid: 7,
        };
        sink.record(&record);
        TracingAuditSink.record(&record);
        assert_eq!(sink.records(), vec![record]);
    }
}
