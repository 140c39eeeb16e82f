//! Rotation-specific error types
//!
//! [`RotationError`] is both what entry points return and what a failed
//! attempt records as its root cause.

use thiserror::Error;

use super::state::RotationState;
use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::core::{AccountId, BackupId};
use crate::keygen::GenerationError;
use crate::lease::LeaseError;
use crate::precondition::BlockedReason;
use crate::remote::RemoteError;
use crate::slot::SlotError;

/// Errors that can occur during key rotation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    /// The environment is not ready; never retried automatically
    #[error("Precondition blocked: {0}")]
    BlockedPrecondition(BlockedReason),

    /// Key generation failed on every attempt of the budget
    #[error("Key generation failed after {attempts} attempt(s): {source}")]
    Generation {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    /// A backup could not be written; unsafe to proceed
    #[error("Backup write failed: {0}")]
    BackupWrite(#[source] BackupError),

    /// Backups could not be read
    #[error("Backup read failed: {0}")]
    BackupRead(#[source] BackupError),

    /// The remote call failed or timed out
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote call succeeded but the key does not authenticate
    #[error("Key {fingerprint} failed to authenticate: {reason}")]
    AuthFailed { fingerprint: String, reason: String },

    /// A backup failed its integrity check
    #[error("Backup {id} is corrupt: {reason}")]
    CorruptBackup { id: BackupId, reason: String },

    /// No backup with this id
    #[error("Backup not found: {0}")]
    BackupNotFound(BackupId),

    /// Another attempt holds the account's lease
    #[error("Rotation already in progress for {account} (held by {holder})")]
    RotationInProgress { account: AccountId, holder: String },

    /// Putting the pre-update key back failed
    #[error("Rollback failed: {reason}")]
    RollbackFailed { reason: String },

    /// Emergency recovery found nothing it could restore
    #[error("No valid backup among {candidates} candidate(s)")]
    NoValidBackup { candidates: usize },

    /// An emergency key is stored but must be pushed by an operator
    #[error("Emergency key {fingerprint} (backup {backup_id}) must be pushed manually")]
    ManualPushRequired {
        backup_id: BackupId,
        fingerprint: String,
    },

    /// State transition is not allowed
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: RotationState,
        to: RotationState,
    },

    /// Lease storage failed
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// The active key slot failed
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// Configuration or wiring is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operator input could not be understood
    #[error("Invalid operator command: {0}")]
    InvalidCommand(String),

    /// Internal error (should not normally occur)
    #[error("Internal rotation error: {0}")]
    Internal(String),
}

impl From<BackupError> for RotationError {
    /// Read-side mapping; writes use [`RotationError::BackupWrite`] explicitly
    fn from(error: BackupError) -> Self {
        match error {
            BackupError::NotFound(id) => Self::BackupNotFound(id),
            BackupError::Corrupt { id, reason } => Self::CorruptBackup { id, reason },
            other @ (BackupError::Write(_) | BackupError::AlreadyExists(_)) => {
                Self::BackupWrite(other)
            }
            other @ BackupError::Read(_) => Self::BackupRead(other),
        }
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;
