//! Manual flow
//!
//! Started by an operator, runs in the background, reports each transition
//! as it happens and can be cancelled until the remote update completes.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::attempt::RotationAttempt;
use super::error::{RotationError, RotationResult};
use crate::core::AttemptId;
use crate::precondition::Caller;

/// Operator request for a manual rotation
#[derive(Debug, Clone)]
pub struct ManualRequest {
    /// Operator name for logs and audit
    pub triggered_by: String,
    /// Free-text justification
    pub reason: String,
    /// Identity checked by the precondition validator
    pub caller: Caller,
}

impl ManualRequest {
    /// Request by `caller`
    pub fn new(caller: Caller, reason: impl Into<String>) -> Self {
        Self {
            triggered_by: caller.id.clone(),
            reason: reason.into(),
            caller,
        }
    }
}

/// Handle on a running manual rotation
#[derive(Debug)]
pub struct ManualRotationHandle {
    attempt_id: AttemptId,
    cancel: CancellationToken,
    updates: watch::Receiver<RotationAttempt>,
    task: JoinHandle<RotationResult<RotationAttempt>>,
}

impl ManualRotationHandle {
    pub(super) fn new(
        attempt_id: AttemptId,
        cancel: CancellationToken,
        updates: watch::Receiver<RotationAttempt>,
        task: JoinHandle<RotationResult<RotationAttempt>>,
    ) -> Self {
        Self {
            attempt_id,
            cancel,
            updates,
            task,
        }
    }

    /// Attempt being run
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Request cancellation
    ///
    /// Honoured at the next state boundary. Before the remote update the
    /// generated key is discarded; right after it the pre-update key is
    /// restored. Once verification has started the request is ignored.
    pub fn cancel(&self) {
        tracing::info!(attempt_id = %self.attempt_id, "Manual rotation cancel requested");
        self.cancel.cancel();
    }

    /// Latest snapshot
    pub fn status(&self) -> RotationAttempt {
        self.updates.borrow().clone()
    }

    /// Receiver that changes on every transition
    pub fn subscribe(&self) -> watch::Receiver<RotationAttempt> {
        self.updates.clone()
    }

    /// Wait for the final attempt
    pub async fn wait(self) -> RotationResult<RotationAttempt> {
        self.task
            .await
            .map_err(|e| RotationError::Internal(format!("manual rotation task failed: {e}")))?
    }
}
