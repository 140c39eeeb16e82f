//! Backup store
//!
//! Durable, timestamped archive of key pairs. Private keys are sealed with
//! AES-256-GCM before they reach a [`BackupBackend`]; a backup is never
//! rewritten once inserted. Every `store` and `restore` emits an audit entry.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = BackupStore::new(account, Arc::new(MemoryBackupBackend::new()), key, audit);
//! let backup = store.store(&pair, BackupLabel::PreUpdate, &scope).await?;
//! let restored = store.restore(backup.id, &scope).await?;
//! ```

mod local;
mod memory;

pub use local::LocalBackupBackend;
pub use memory::MemoryBackupBackend;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

use crate::audit::{AuditDispatcher, AuditEvent, AuditScope};
use crate::core::{AccountId, AttemptId, BackupId, KeyPair, PrivateKey, PublicKey};
use crate::rotation::Flow;
use crate::utils::{EncryptedData, EncryptionKey, decrypt, encrypt};

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupLabel {
    /// The working key, before the remote account is touched
    PreUpdate,
    /// The new key, after it authenticated
    PostUpdate,
    /// A freshly generated emergency key
    Emergency,
}

impl fmt::Display for BackupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupLabel::PreUpdate => write!(f, "pre_update"),
            BackupLabel::PostUpdate => write!(f, "post_update"),
            BackupLabel::Emergency => write!(f, "emergency"),
        }
    }
}

/// Archived key pair
///
/// The public key and fingerprint are recorded in clear so backups can be
/// listed without the encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Timestamp-derived identifier
    pub id: BackupId,
    /// Account the key belongs to
    pub account: AccountId,
    /// When the backup was written
    pub created_at: DateTime<Utc>,
    /// When the archived key pair was generated
    pub key_created_at: DateTime<Utc>,
    /// Why the backup was taken
    pub label: BackupLabel,
    /// Flow that wrote it
    pub source_flow: Flow,
    /// Attempt that wrote it
    pub attempt_id: AttemptId,
    /// Normalized public key
    pub public_key: String,
    /// Public key fingerprint
    pub fingerprint: String,
    /// Sealed PKCS#8 DER of the private key
    pub sealed_key: EncryptedData,
    /// SHA-256 of the private key DER, base64
    pub checksum: String,
}

/// Integrity check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Decrypts, decodes and matches its recorded public key
    Valid,
    /// Must not be trusted
    Invalid(String),
}

impl Validity {
    /// Whether the backup passed
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Backup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackupError {
    /// No backup with this id
    #[error("Backup not found: {0}")]
    NotFound(BackupId),

    /// Backup exists but fails integrity checks
    #[error("Backup {id} is corrupt: {reason}")]
    Corrupt { id: BackupId, reason: String },

    /// Storage rejected the write
    #[error("Backup write failed: {0}")]
    Write(String),

    /// Storage could not be read
    #[error("Backup read failed: {0}")]
    Read(String),

    /// A backup with this id already exists
    #[error("Backup already exists: {0}")]
    AlreadyExists(BackupId),
}

/// Persistence for backups
///
/// Implementations must make `insert` durable before returning and must never
/// replace an existing id.
#[async_trait]
pub trait BackupBackend: Send + Sync {
    /// Persist a new backup
    async fn insert(&self, backup: &Backup) -> Result<(), BackupError>;

    /// Fetch one backup
    async fn get(&self, account: &AccountId, id: BackupId) -> Result<Option<Backup>, BackupError>;

    /// Every readable backup for `account`, in any order
    async fn list(&self, account: &AccountId) -> Result<Vec<Backup>, BackupError>;

    /// Highest id stored for `account`
    async fn latest_id(&self, account: &AccountId) -> Result<Option<BackupId>, BackupError> {
        Ok(self.list(account).await?.iter().map(|b| b.id).max())
    }
}

/// Backup component used by the orchestrator
pub struct BackupStore {
    account: AccountId,
    backend: Arc<dyn BackupBackend>,
    key: EncryptionKey,
    audit: AuditDispatcher,
    last_id: Mutex<Option<BackupId>>,
}

impl fmt::Debug for BackupStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupStore")
            .field("account", &self.account)
            .finish()
    }
}

impl BackupStore {
    /// Create a store for `account`
    pub fn new(
        account: AccountId,
        backend: Arc<dyn BackupBackend>,
        key: EncryptionKey,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            account,
            backend,
            key,
            audit,
            last_id: Mutex::new(None),
        }
    }

    /// Seal and persist `pair`
    ///
    /// Returns once the backend has durably written the backup.
    pub async fn store(
        &self,
        pair: &KeyPair,
        label: BackupLabel,
        scope: &AuditScope,
    ) -> Result<Backup, BackupError> {
        // Held across the insert so concurrent stores get increasing ids
        let mut last = self.last_id.lock().await;

        let previous = match *last {
            Some(id) => Some(id),
            None => self.backend.latest_id(&self.account).await?,
        };
        let now = BackupId::from_timestamp(Utc::now());
        let id = match previous {
            Some(prev) if now <= prev => prev.successor(),
            _ => now,
        };

        let der = pair.private_key().as_pkcs8_der();
        let sealed_key = encrypt(&self.key, der).map_err(|e| BackupError::Write(e.to_string()))?;

        let backup = Backup {
            id,
            account: self.account.clone(),
            created_at: Utc::now(),
            key_created_at: pair.created_at(),
            label,
            source_flow: scope.flow,
            attempt_id: scope.attempt_id,
            public_key: pair.public_key().as_str().to_string(),
            fingerprint: pair.public_key().fingerprint(),
            sealed_key,
            checksum: checksum(der),
        };

        self.backend.insert(&backup).await?;
        *last = Some(id);
        drop(last);

        tracing::info!(
            backup_id = %id,
            label = %label,
            fingerprint = %backup.fingerprint,
            "Stored backup"
        );
        self.audit.emit(
            scope,
            AuditEvent::BackupStored {
                backup_id: id,
                label,
                fingerprint: backup.fingerprint.clone(),
            },
        );

        Ok(backup)
    }

    /// All backups, most recent first
    pub async fn list(&self) -> Result<Vec<Backup>, BackupError> {
        let mut backups = self.backend.list(&self.account).await?;
        backups.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(backups)
    }

    /// One backup by id
    pub async fn get(&self, id: BackupId) -> Result<Backup, BackupError> {
        self.backend
            .get(&self.account, id)
            .await?
            .ok_or(BackupError::NotFound(id))
    }

    /// Integrity check: decrypts, decodes, and round-trips to the recorded
    /// public key
    pub fn validate(&self, backup: &Backup) -> Validity {
        match self.open(backup) {
            Ok(_) => Validity::Valid,
            Err(BackupError::Corrupt { reason, .. }) => Validity::Invalid(reason),
            Err(other) => Validity::Invalid(other.to_string()),
        }
    }

    /// Fetch, validate and unseal a backup
    pub async fn restore(&self, id: BackupId, scope: &AuditScope) -> Result<KeyPair, BackupError> {
        let result = match self.get(id).await {
            Ok(backup) => self.open(&backup),
            Err(e) => Err(e),
        };

        match &result {
            Ok(pair) => {
                tracing::info!(
                    backup_id = %id,
                    fingerprint = %pair.public_key().fingerprint(),
                    "Restored backup"
                );
                self.audit
                    .emit(scope, AuditEvent::BackupRestored { backup_id: id });
            }
            Err(e) => {
                tracing::warn!(backup_id = %id, error = %e, "Backup restore failed");
                self.audit.emit(
                    scope,
                    AuditEvent::BackupRestoreFailed {
                        backup_id: id,
                        reason: e.to_string(),
                    },
                );
            }
        }

        result
    }

    fn open(&self, backup: &Backup) -> Result<KeyPair, BackupError> {
        let corrupt = |reason: String| BackupError::Corrupt {
            id: backup.id,
            reason,
        };

        if backup.account != self.account {
            return Err(corrupt(format!("belongs to account {}", backup.account)));
        }

        let der = decrypt(&self.key, &backup.sealed_key).map_err(|e| corrupt(e.to_string()))?;

        let expected = STANDARD
            .decode(backup.checksum.as_bytes())
            .map_err(|e| corrupt(format!("checksum is not base64: {e}")))?;
        let actual = Sha256::digest(der.as_slice());
        if !bool::from(actual.as_slice().ct_eq(expected.as_slice())) {
            return Err(corrupt("checksum mismatch".to_string()));
        }

        let private_key = PrivateKey::from_pkcs8_der(&der).map_err(|e| corrupt(e.to_string()))?;
        let pair = KeyPair::from_private_key(private_key, backup.key_created_at)
            .map_err(|e| corrupt(e.to_string()))?;

        let recorded = PublicKey::parse(&backup.public_key)
            .map_err(|e| corrupt(format!("recorded public key: {e}")))?;
        if &recorded != pair.public_key() {
            return Err(corrupt("private key does not match recorded public key".to_string()));
        }

        Ok(pair)
    }
}

fn checksum(der: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(der))
}
