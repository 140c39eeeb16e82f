//! Emergency flow
//!
//! Entered by escalation from a failed rollback or directly by an operator.
//! Backups are tried newest first and the first one passing integrity
//! validation is restored, pushed and verified. When none validates, a fresh
//! emergency key is generated and backed up; unless automatic pushing is
//! enabled, an operator must push it and confirm with
//! [`Rotator::confirm_manual_push`].

use super::attempt::{Flow, RotationAttempt};
use super::error::{RotationError, RotationResult};
use super::orchestrator::{Fault, Plan, Rotator, Run};
use super::state::RotationState;
use crate::audit::AuditEvent;
use crate::backup::{Backup, BackupLabel, Validity};
use crate::core::BackupId;
use crate::precondition::Caller;

/// Operator request for the Emergency flow
#[derive(Debug, Clone)]
pub struct EmergencyRequest {
    /// Who asked
    pub triggered_by: Caller,
    /// Why, for the audit trail
    pub reason: String,
}

impl EmergencyRequest {
    /// Request attributed to `caller`
    pub fn new(caller: Caller, reason: impl Into<String>) -> Self {
        Self {
            triggered_by: caller,
            reason: reason.into(),
        }
    }
}

/// What to do when restoring a chosen backup fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    /// Fall through to an emergency key
    EmergencyKey,
    /// The operator chose this backup; report and stop
    Stop,
}

impl Run<'_> {
    fn escalation_notice(&self, reason: String) {
        tracing::error!(reason = %reason, "Escalating to emergency recovery");
        self.inner
            .audit
            .emit(&self.scope, AuditEvent::EscalationNotice { reason });
    }

    /// Rollback failed: hand over to emergency recovery
    pub(super) async fn escalate(&mut self, fault: Fault) -> RotationResult<()> {
        self.stop_cancellation();
        self.attempt.last_error = Some(fault.cause.clone());
        self.advance(RotationState::Escalating)?;
        self.escalation_notice(fault.cause.to_string());
        self.recover(Some(fault)).await
    }

    /// Operator-triggered Emergency flow
    pub(super) async fn emergency(&mut self, request: &EmergencyRequest) -> RotationResult<()> {
        self.stop_cancellation();
        self.advance(RotationState::Escalating)?;
        self.escalation_notice(format!(
            "emergency requested by {}: {}",
            request.triggered_by.id, request.reason
        ));
        self.recover(None).await
    }

    /// From `Escalating`: newest valid backup, else an emergency key
    ///
    /// `cause` is the failure that led here, if any. A recovered account
    /// still ends `Failed` with that cause.
    async fn recover(&mut self, cause: Option<Fault>) -> RotationResult<()> {
        let candidates = match self.inner.backups.list().await {
            Ok(backups) => backups,
            Err(e) => {
                self.note(RotationError::BackupRead(e));
                Vec::new()
            }
        };

        match self.first_valid(&candidates) {
            Some(id) => self.restore_and_verify(id, cause, Fallback::EmergencyKey).await,
            None => {
                let none_valid = RotationError::NoValidBackup {
                    candidates: candidates.len(),
                };
                self.escalation_notice(format!("{none_valid}; generating an emergency key"));
                self.attempt.last_error = Some(none_valid);
                self.emergency_key(cause).await
            }
        }
    }

    /// Newest backup passing validation; every rejected one is audited
    fn first_valid(&self, candidates: &[Backup]) -> Option<BackupId> {
        for backup in candidates {
            match self.inner.backups.validate(backup) {
                Validity::Valid => {
                    tracing::info!(backup_id = %backup.id, label = %backup.label, "Selected backup");
                    return Some(backup.id);
                }
                Validity::Invalid(reason) => {
                    tracing::warn!(backup_id = %backup.id, reason = %reason, "Skipping invalid backup");
                    self.inner.audit.emit(
                        &self.scope,
                        AuditEvent::BackupRestoreFailed {
                            backup_id: backup.id,
                            reason,
                        },
                    );
                }
            }
        }
        None
    }

    async fn restore_and_verify(
        &mut self,
        backup_id: BackupId,
        cause: Option<Fault>,
        fallback: Fallback,
    ) -> RotationResult<()> {
        self.advance(RotationState::Restoring)?;
        let pair = match self.inner.backups.restore(backup_id, &self.scope).await {
            Ok(pair) => pair,
            Err(e) => return self.recovery_failed(e.into(), cause, fallback).await,
        };
        self.attempt.restored_backup = Some(backup_id);

        self.advance(RotationState::Updating)?;
        if let Err(e) = self.push(pair.public_key()).await {
            return self.recovery_failed(e.into(), cause, fallback).await;
        }

        // A stale backup can decode fine and still be refused by the remote
        self.advance(RotationState::Verifying)?;
        if let Err(e) = self.verify(&pair).await {
            return self.recovery_failed(e, cause, fallback).await;
        }

        if let Err(e) = self.inner.slot.install(&pair).await {
            return self.fail(e.into());
        }
        tracing::info!(backup_id = %backup_id, "Restored backup is live");
        self.recovered(cause)
    }

    async fn recovery_failed(
        &mut self,
        error: RotationError,
        cause: Option<Fault>,
        fallback: Fallback,
    ) -> RotationResult<()> {
        self.note(error.clone());
        let fault = self.fault(error);
        self.advance(RotationState::Escalating)?;

        match fallback {
            Fallback::EmergencyKey => {
                self.escalation_notice(format!("restored key unusable: {}", fault.cause));
                self.emergency_key(cause).await
            }
            Fallback::Stop => self.fail_with(cause.unwrap_or(fault)),
        }
    }

    fn recovered(&mut self, cause: Option<Fault>) -> RotationResult<()> {
        match cause {
            None => self.succeed(),
            Some(fault) => {
                tracing::warn!("Account recovered, rotation itself did not complete");
                self.fail_with(fault)
            }
        }
    }

    /// From `Escalating`: generate, back up and (optionally) push a new key
    async fn emergency_key(&mut self, cause: Option<Fault>) -> RotationResult<()> {
        let Some(pair) = self.generate().await? else {
            return Ok(());
        };

        self.advance(RotationState::BackingUp(BackupLabel::Emergency))?;
        let backup = match self
            .inner
            .backups
            .store(&pair, BackupLabel::Emergency, &self.scope)
            .await
        {
            Ok(backup) => backup,
            Err(e) => return self.fail(RotationError::BackupWrite(e)),
        };
        self.attempt.emergency_backup = Some(backup.id);

        if !self.inner.config.emergency_auto_push {
            return self.require_manual_push(&backup);
        }

        self.advance(RotationState::Updating)?;
        if let Err(e) = self.push(pair.public_key()).await {
            self.note(e.into());
            self.advance(RotationState::Escalating)?;
            return self.require_manual_push(&backup);
        }

        self.advance(RotationState::Verifying)?;
        if let Err(e) = self.verify(&pair).await {
            self.note(e);
            self.advance(RotationState::Escalating)?;
            return self.require_manual_push(&backup);
        }

        if let Err(e) = self.inner.slot.install(&pair).await {
            return self.fail(e.into());
        }
        tracing::info!(backup_id = %backup.id, "Emergency key is live");
        self.recovered(cause)
    }

    fn require_manual_push(&mut self, backup: &Backup) -> RotationResult<()> {
        tracing::error!(
            backup_id = %backup.id,
            fingerprint = %backup.fingerprint,
            "Emergency key stored; operator must push it to the remote account"
        );
        self.inner.audit.emit(
            &self.scope,
            AuditEvent::ManualPushRequired {
                backup_id: backup.id,
                fingerprint: backup.fingerprint.clone(),
                public_key: backup.public_key.clone(),
            },
        );
        self.fail(RotationError::ManualPushRequired {
            backup_id: backup.id,
            fingerprint: backup.fingerprint.clone(),
        })
    }

    /// Operator command: put one backup back
    pub(super) async fn restore_backup(&mut self, backup_id: BackupId) -> RotationResult<()> {
        self.advance(RotationState::Escalating)?;

        let backup = match self.inner.backups.get(backup_id).await {
            Ok(backup) => backup,
            Err(e) => return self.fail(e.into()),
        };
        if let Validity::Invalid(reason) = self.inner.backups.validate(&backup) {
            self.inner.audit.emit(
                &self.scope,
                AuditEvent::BackupRestoreFailed {
                    backup_id,
                    reason: reason.clone(),
                },
            );
            return self.fail(RotationError::CorruptBackup {
                id: backup_id,
                reason,
            });
        }

        self.restore_and_verify(backup_id, None, Fallback::Stop).await
    }

    /// Operator command: emergency key without trying backups first
    pub(super) async fn generate_emergency_key(&mut self) -> RotationResult<()> {
        self.advance(RotationState::Escalating)?;
        self.emergency_key(None).await
    }

    /// Operator command: an emergency key was pushed by hand
    pub(super) async fn confirm_manual_push(&mut self, backup_id: BackupId) -> RotationResult<()> {
        self.advance(RotationState::Escalating)?;
        self.advance(RotationState::Restoring)?;

        let pair = match self.inner.backups.restore(backup_id, &self.scope).await {
            Ok(pair) => pair,
            Err(e) => return self.fail(e.into()),
        };
        self.attempt.restored_backup = Some(backup_id);

        self.advance(RotationState::Verifying)?;
        if let Err(e) = self.verify(&pair).await {
            let fault = self.fault(e);
            self.advance(RotationState::Escalating)?;
            return self.fail_with(fault);
        }

        if let Err(e) = self.inner.slot.install(&pair).await {
            return self.fail(e.into());
        }

        let fingerprint = pair.public_key().fingerprint();
        tracing::info!(backup_id = %backup_id, fingerprint = %fingerprint, "Manual push confirmed");
        self.inner.audit.emit(
            &self.scope,
            AuditEvent::ManualPushConfirmed {
                backup_id,
                fingerprint,
            },
        );
        self.succeed()
    }
}

impl Rotator {
    /// Operator-triggered Emergency flow
    pub async fn run_emergency(&self, request: EmergencyRequest) -> RotationResult<RotationAttempt> {
        self.run(Flow::Emergency, Plan::Emergency(request)).await
    }

    /// Restore backup `backup_id`, push and verify it
    ///
    /// No fallback: if the chosen backup does not work the attempt fails.
    pub async fn restore_backup(&self, backup_id: BackupId) -> RotationResult<RotationAttempt> {
        self.run(Flow::Emergency, Plan::RestoreBackup(backup_id)).await
    }

    /// Generate and store an emergency key, skipping backups
    pub async fn generate_emergency_key(&self) -> RotationResult<RotationAttempt> {
        self.run(Flow::Emergency, Plan::EmergencyKey).await
    }

    /// Verify and install emergency key `backup_id` after an operator pushed it
    pub async fn confirm_manual_push(&self, backup_id: BackupId) -> RotationResult<RotationAttempt> {
        self.run(Flow::Emergency, Plan::ConfirmPush(backup_id)).await
    }
}
