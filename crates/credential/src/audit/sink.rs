use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AuditEntry, AuditError, AuditSink};

/// Keeps every entry in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Number of entries delivered
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was delivered yet
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn send(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Writes entries to the `keyshift::audit` tracing target
///
/// Notable events are logged at `warn`, the rest at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn send(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let event =
            serde_json::to_string(&entry.event).map_err(|e| AuditError::Delivery(e.to_string()))?;

        if entry.event.is_notable() {
            tracing::warn!(
                target: "keyshift::audit",
                sequence = entry.sequence,
                attempt_id = %entry.attempt_id,
                account = %entry.account,
                flow = %entry.flow,
                event = %event,
                "{}",
                entry.event.description()
            );
        } else {
            tracing::info!(
                target: "keyshift::audit",
                sequence = entry.sequence,
                attempt_id = %entry.attempt_id,
                account = %entry.account,
                flow = %entry.flow,
                event = %event,
                "{}",
                entry.event.description()
            );
        }
        Ok(())
    }
}
