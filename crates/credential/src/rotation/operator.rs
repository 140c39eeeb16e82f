//! Operator commands
//!
//! Named operations for an operator shell: manual `start`, `cancel` and
//! `status`, and emergency `list-backups`, `restore <id>`,
//! `generate-emergency-key` and `confirm-push <id>`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

use super::attempt::{Flow, RotationAttempt};
use super::error::{RotationError, RotationResult};
use super::manual::{ManualRequest, ManualRotationHandle};
use super::orchestrator::Rotator;
use crate::backup::BackupLabel;
use crate::core::{AttemptId, BackupId};

/// Operator-facing view of one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    /// Backup identifier
    pub id: BackupId,
    /// When it was written
    pub created_at: DateTime<Utc>,
    /// Why it was written
    pub label: BackupLabel,
    /// Flow that wrote it
    pub source_flow: Flow,
    /// Archived key's fingerprint
    pub fingerprint: String,
    /// Integrity check result; `None` when it passed
    pub invalid_reason: Option<String>,
}

impl BackupSummary {
    /// Whether the backup passed its integrity check
    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }
}

/// A command from the operator shell
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    /// Start a manual rotation
    Start(ManualRequest),
    /// Cancel a running manual rotation
    Cancel(AttemptId),
    /// Current or last attempt
    Status,
    /// Backups, newest first, with integrity results
    ListBackups,
    /// Restore one backup
    Restore(BackupId),
    /// Generate and store an emergency key
    GenerateEmergencyKey,
    /// An emergency key was pushed by hand
    ConfirmPush(BackupId),
}

impl FromStr for OperatorCommand {
    type Err = RotationError;

    /// Parses `status`, `list-backups`, `generate-emergency-key`,
    /// `cancel <attempt-id>`, `restore <backup-id>` and `confirm-push <backup-id>`
    ///
    /// `start` needs a caller and is built programmatically.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut words = input.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let argument = words.next();

        let backup_id = |arg: Option<&str>| -> Result<BackupId, RotationError> {
            arg.ok_or_else(|| RotationError::InvalidCommand(format!("'{verb}' needs a backup id")))?
                .parse()
                .map_err(|e| RotationError::InvalidCommand(format!("invalid backup id: {e}")))
        };

        match verb {
            "status" => Ok(Self::Status),
            "list-backups" => Ok(Self::ListBackups),
            "generate-emergency-key" => Ok(Self::GenerateEmergencyKey),
            "restore" => Ok(Self::Restore(backup_id(argument)?)),
            "confirm-push" => Ok(Self::ConfirmPush(backup_id(argument)?)),
            "cancel" => {
                let id = argument
                    .ok_or_else(|| RotationError::InvalidCommand("'cancel' needs an attempt id".into()))?
                    .parse::<uuid::Uuid>()
                    .map_err(|e| RotationError::InvalidCommand(format!("invalid attempt id: {e}")))?;
                Ok(Self::Cancel(AttemptId::from(id)))
            }
            other => Err(RotationError::InvalidCommand(format!("unknown command '{other}'"))),
        }
    }
}

/// Result of an [`OperatorCommand`]
#[derive(Debug)]
pub enum OperatorResponse {
    /// Manual rotation is running
    Started(ManualRotationHandle),
    /// Whether a matching manual attempt was running
    CancelRequested(bool),
    /// Latest attempt snapshot
    Status(Option<RotationAttempt>),
    /// Backups, newest first
    Backups(Vec<BackupSummary>),
    /// A finished emergency attempt
    Finished(RotationAttempt),
}

impl Rotator {
    /// Backups newest first, each checked for integrity
    pub async fn list_backups(&self) -> RotationResult<Vec<BackupSummary>> {
        let backups = self
            .inner
            .backups
            .list()
            .await
            .map_err(RotationError::BackupRead)?;

        Ok(backups
            .iter()
            .map(|backup| BackupSummary {
                id: backup.id,
                created_at: backup.created_at,
                label: backup.label,
                source_flow: backup.source_flow,
                fingerprint: backup.fingerprint.clone(),
                invalid_reason: match self.inner.backups.validate(backup) {
                    crate::backup::Validity::Valid => None,
                    crate::backup::Validity::Invalid(reason) => Some(reason),
                },
            })
            .collect())
    }

    /// Dispatch an operator command
    pub async fn execute(&self, command: OperatorCommand) -> RotationResult<OperatorResponse> {
        tracing::debug!(command = ?command, "Operator command");

        match command {
            OperatorCommand::Start(request) => {
                self.start_manual(request).await.map(OperatorResponse::Started)
            }
            OperatorCommand::Cancel(id) => Ok(OperatorResponse::CancelRequested(self.cancel(id))),
            OperatorCommand::Status => Ok(OperatorResponse::Status(self.status())),
            OperatorCommand::ListBackups => self.list_backups().await.map(OperatorResponse::Backups),
            OperatorCommand::Restore(id) => {
                self.restore_backup(id).await.map(OperatorResponse::Finished)
            }
            OperatorCommand::GenerateEmergencyKey => self
                .generate_emergency_key()
                .await
                .map(OperatorResponse::Finished),
            OperatorCommand::ConfirmPush(id) => self
                .confirm_manual_push(id)
                .await
                .map(OperatorResponse::Finished),
        }
    }
}
