//! Active key slot
//!
//! Where the consuming service reads its private key from. The orchestrator
//! only installs a key here after the remote platform has accepted it and an
//! authentication with it succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::core::{KeyPair, PrivateKey};
use crate::utils::{EncryptedData, EncryptionKey, atomic_write, decrypt, encrypt, ensure_private_dir};

/// Key slot errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// Slot could not be read
    #[error("Key slot read failed: {0}")]
    Read(String),

    /// Slot could not be written
    #[error("Key slot write failed: {0}")]
    Write(String),

    /// Slot content is unusable
    #[error("Key slot is corrupt: {0}")]
    Corrupt(String),
}

/// The live key pair used by the service account
#[async_trait]
pub trait ActiveKeySlot: Send + Sync {
    /// Currently installed key pair, if any
    async fn current(&self) -> Result<Option<KeyPair>, SlotError>;

    /// Replace the installed key pair
    async fn install(&self, pair: &KeyPair) -> Result<(), SlotError>;
}

struct StoredKey {
    der: Zeroizing<Vec<u8>>,
    created_at: DateTime<Utc>,
}

/// Key slot held in memory
#[derive(Default)]
pub struct MemoryKeySlot {
    inner: RwLock<Option<StoredKey>>,
}

impl std::fmt::Debug for MemoryKeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeySlot")
            .field("occupied", &self.inner.read().is_some())
            .finish()
    }
}

impl MemoryKeySlot {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot pre-loaded with `pair`
    pub fn with_key(pair: &KeyPair) -> Self {
        let slot = Self::new();
        *slot.inner.write() = Some(StoredKey {
            der: Zeroizing::new(pair.private_key().as_pkcs8_der().to_vec()),
            created_at: pair.created_at(),
        });
        slot
    }
}

#[async_trait]
impl ActiveKeySlot for MemoryKeySlot {
    async fn current(&self) -> Result<Option<KeyPair>, SlotError> {
        let guard = self.inner.read();
        let Some(stored) = guard.as_ref() else {
            return Ok(None);
        };

        let private_key =
            PrivateKey::from_pkcs8_der(&stored.der).map_err(|e| SlotError::Corrupt(e.to_string()))?;
        KeyPair::from_private_key(private_key, stored.created_at)
            .map(Some)
            .map_err(|e| SlotError::Corrupt(e.to_string()))
    }

    async fn install(&self, pair: &KeyPair) -> Result<(), SlotError> {
        *self.inner.write() = Some(StoredKey {
            der: Zeroizing::new(pair.private_key().as_pkcs8_der().to_vec()),
            created_at: pair.created_at(),
        });
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SlotFile {
    public_key: String,
    fingerprint: String,
    created_at: DateTime<Utc>,
    installed_at: DateTime<Utc>,
    sealed_key: EncryptedData,
}

/// Key slot stored as an encrypted file
#[derive(Debug, Clone)]
pub struct LocalKeySlot {
    path: PathBuf,
    key: EncryptionKey,
}

impl LocalKeySlot {
    /// Slot file at `path`, sealed with `key`
    pub fn new(path: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// Slot file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ActiveKeySlot for LocalKeySlot {
    async fn current(&self) -> Result<Option<KeyPair>, SlotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SlotError::Read(e.to_string())),
        };

        let file: SlotFile =
            serde_json::from_slice(&bytes).map_err(|e| SlotError::Corrupt(e.to_string()))?;
        let der = decrypt(&self.key, &file.sealed_key).map_err(|e| SlotError::Corrupt(e.to_string()))?;
        let private_key =
            PrivateKey::from_pkcs8_der(&der).map_err(|e| SlotError::Corrupt(e.to_string()))?;
        let pair = KeyPair::from_private_key(private_key, file.created_at)
            .map_err(|e| SlotError::Corrupt(e.to_string()))?;

        if pair.public_key().as_str() != file.public_key {
            return Err(SlotError::Corrupt(
                "private key does not match recorded public key".to_string(),
            ));
        }

        Ok(Some(pair))
    }

    async fn install(&self, pair: &KeyPair) -> Result<(), SlotError> {
        if let Some(dir) = self.path.parent() {
            ensure_private_dir(dir)
                .await
                .map_err(|e| SlotError::Write(e.to_string()))?;
        }

        let file = SlotFile {
            public_key: pair.public_key().as_str().to_string(),
            fingerprint: pair.public_key().fingerprint(),
            created_at: pair.created_at(),
            installed_at: Utc::now(),
            sealed_key: encrypt(&self.key, pair.private_key().as_pkcs8_der())
                .map_err(|e| SlotError::Write(e.to_string()))?,
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| SlotError::Write(e.to_string()))?;

        atomic_write(&self.path, &json)
            .await
            .map_err(|e| SlotError::Write(format!("{}: {e}", self.path.display())))?;

        tracing::info!(
            path = %self.path.display(),
            fingerprint = %file.fingerprint,
            "Installed active key"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_key_pair;

    #[tokio::test]
    async fn memory_slot_round_trips() {
        let slot = MemoryKeySlot::new();
        assert!(slot.current().await.unwrap().is_none());

        let pair = test_key_pair();
        slot.install(&pair).await.unwrap();
        let current = slot.current().await.unwrap().unwrap();
        assert_eq!(current.public_key(), pair.public_key());
    }

    #[tokio::test]
    async fn local_slot_is_encrypted_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("active.json");
        let slot = LocalKeySlot::new(&path, EncryptionKey::generate());

        let first = test_key_pair();
        slot.install(&first).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("PRIVATE KEY"));

        let second = test_key_pair();
        slot.install(&second).await.unwrap();
        let current = slot.current().await.unwrap().unwrap();
        assert_eq!(current.public_key(), second.public_key());
    }

    #[tokio::test]
    async fn local_slot_with_wrong_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.json");
        LocalKeySlot::new(&path, EncryptionKey::generate())
            .install(&test_key_pair())
            .await
            .unwrap();

        let other = LocalKeySlot::new(&path, EncryptionKey::generate());
        assert!(matches!(other.current().await, Err(SlotError::Corrupt(_))));
    }
}
