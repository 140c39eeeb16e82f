//! Audit and notification
//!
//! Every state transition and every terminal outcome becomes an
//! [`AuditEntry`]. Delivery is fire-and-forget from the orchestrator's point
//! of view: [`AuditDispatcher::emit`] only queues, and a background task hands
//! entries to the configured [`AuditSink`] in order. A sink that fails or
//! hangs is logged and skipped; it never fails or stalls a rotation.

mod sink;
mod webhook;

pub use sink::{MemoryAuditSink, TracingAuditSink};
pub use webhook::WebhookAuditSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::backup::BackupLabel;
use crate::core::{AccountId, AttemptId, BackupId};
use crate::rotation::{AttemptFailure, Flow, RotationState};

/// Attribution shared by every entry of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditScope {
    /// Attempt the entry belongs to
    pub attempt_id: AttemptId,
    /// Account being rotated
    pub account: AccountId,
    /// Flow that owns the attempt
    pub flow: Flow,
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Dispatcher-wide emission order
    pub sequence: u64,
    /// Attempt the entry belongs to
    pub attempt_id: AttemptId,
    /// Account being rotated
    pub account: AccountId,
    /// Flow that owns the attempt
    pub flow: Flow,
    /// Emission time
    pub at: DateTime<Utc>,
    /// What happened
    pub event: AuditEvent,
}

/// What an audit entry records
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// State machine moved
    Transition {
        from: RotationState,
        to: RotationState,
    },

    /// A backup was durably written
    BackupStored {
        backup_id: BackupId,
        label: BackupLabel,
        fingerprint: String,
    },

    /// A backup was unsealed for use
    BackupRestored { backup_id: BackupId },

    /// A backup could not be restored
    BackupRestoreFailed { backup_id: BackupId, reason: String },

    /// Automated recovery gave up; the Emergency flow takes over
    EscalationNotice { reason: String },

    /// An emergency key exists but an operator must push it
    ManualPushRequired {
        backup_id: BackupId,
        fingerprint: String,
        public_key: String,
    },

    /// An operator-pushed emergency key authenticated and was installed
    ManualPushConfirmed {
        backup_id: BackupId,
        fingerprint: String,
    },

    /// The active key is approaching its rotation date
    ExpiryWarning {
        key_age_days: i64,
        due_at: DateTime<Utc>,
    },

    /// Attempt finished
    Terminal {
        state: RotationState,
        failure: Option<AttemptFailure>,
    },
}

impl AuditEvent {
    /// Whether the event is worth interrupting a human for
    pub fn is_notable(&self) -> bool {
        !matches!(
            self,
            Self::Transition { .. } | Self::BackupStored { .. } | Self::BackupRestored { .. }
        )
    }

    /// One-line human readable summary
    pub fn description(&self) -> String {
        match self {
            Self::Transition { from, to } => format!("{from} -> {to}"),
            Self::BackupStored {
                backup_id,
                label,
                fingerprint,
            } => format!("Stored {label} backup {backup_id} ({fingerprint})"),
            Self::BackupRestored { backup_id } => format!("Restored backup {backup_id}"),
            Self::BackupRestoreFailed { backup_id, reason } => {
                format!("Could not restore backup {backup_id}: {reason}")
            }
            Self::EscalationNotice { reason } => format!("ESCALATION: {reason}"),
            Self::ManualPushRequired {
                backup_id,
                fingerprint,
                ..
            } => format!(
                "MANUAL ACTION: push emergency key {fingerprint} (backup {backup_id}) to the remote account"
            ),
            Self::ManualPushConfirmed {
                backup_id,
                fingerprint,
            } => format!("Emergency key {fingerprint} (backup {backup_id}) confirmed and installed"),
            Self::ExpiryWarning {
                key_age_days,
                due_at,
            } => format!("Key is {key_age_days} days old; rotation due at {due_at}"),
            Self::Terminal {
                state,
                failure: None,
            } => format!("Rotation finished: {state}"),
            Self::Terminal {
                state,
                failure: Some(failure),
            } => format!("Rotation finished: {state} ({failure})"),
        }
    }
}

/// Audit delivery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// The sink rejected or could not transmit the entry
    #[error("Audit delivery failed: {0}")]
    Delivery(String),
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Deliver one entry
    async fn send(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

enum Command {
    Deliver(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking front of an [`AuditSink`]
///
/// Cloning shares the queue and the sequence counter.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::UnboundedSender<Command>,
    // Guards numbering and enqueueing together so sequence order is queue order
    sequence: Arc<Mutex<u64>>,
}

impl fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("next_sequence", &*self.sequence.lock())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl AuditDispatcher {
    /// Start the delivery task for `sink`
    ///
    /// Each delivery is abandoned after `delivery_timeout`. Must be called
    /// from within a Tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, delivery_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(sink, delivery_timeout, rx));

        Self {
            tx,
            sequence: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue an entry; returns its sequence number
    pub fn emit(&self, scope: &AuditScope, event: AuditEvent) -> u64 {
        let mut next = self.sequence.lock();
        let sequence = *next;
        *next += 1;

        let entry = AuditEntry {
            sequence,
            attempt_id: scope.attempt_id,
            account: scope.account.clone(),
            flow: scope.flow,
            at: Utc::now(),
            event,
        };

        if self.tx.send(Command::Deliver(Box::new(entry))).is_err() {
            tracing::error!(
                sequence,
                attempt_id = %scope.attempt_id,
                "Audit worker has stopped; entry dropped"
            );
        }
        sequence
    }

    /// Wait until every entry queued so far has been handed to the sink
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn deliver(
    sink: Arc<dyn AuditSink>,
    delivery_timeout: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(entry) => {
                match tokio::time::timeout(delivery_timeout, sink.send(&entry)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        sequence = entry.sequence,
                        attempt_id = %entry.attempt_id,
                        error = %e,
                        "Audit delivery failed"
                    ),
                    Err(_) => tracing::warn!(
                        sequence = entry.sequence,
                        attempt_id = %entry.attempt_id,
                        timeout_ms = delivery_timeout.as_millis() as u64,
                        "Audit delivery timed out"
                    ),
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Audit dispatcher closed");
}
