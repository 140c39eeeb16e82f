//! In-memory backup backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{Backup, BackupBackend, BackupError};
use crate::core::{AccountId, BackupId};

/// Backups held in process memory
///
/// Not durable; meant for tests and for embedding where another layer
/// persists state.
#[derive(Debug, Default)]
pub struct MemoryBackupBackend {
    backups: RwLock<HashMap<AccountId, BTreeMap<BackupId, Backup>>>,
}

impl MemoryBackupBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backups held for `account`
    pub fn len(&self, account: &AccountId) -> usize {
        self.backups.read().get(account).map_or(0, BTreeMap::len)
    }

    /// Whether no backups are held for `account`
    pub fn is_empty(&self, account: &AccountId) -> bool {
        self.len(account) == 0
    }
}

#[async_trait]
impl BackupBackend for MemoryBackupBackend {
    async fn insert(&self, backup: &Backup) -> Result<(), BackupError> {
        let mut backups = self.backups.write();
        let entries = backups.entry(backup.account.clone()).or_default();

        if entries.contains_key(&backup.id) {
            return Err(BackupError::AlreadyExists(backup.id));
        }

        entries.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn get(&self, account: &AccountId, id: BackupId) -> Result<Option<Backup>, BackupError> {
        Ok(self
            .backups
            .read()
            .get(account)
            .and_then(|entries| entries.get(&id))
            .cloned())
    }

    async fn list(&self, account: &AccountId) -> Result<Vec<Backup>, BackupError> {
        Ok(self
            .backups
            .read()
            .get(account)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_id(&self, account: &AccountId) -> Result<Option<BackupId>, BackupError> {
        Ok(self
            .backups
            .read()
            .get(account)
            .and_then(|entries| entries.keys().next_back().copied()))
    }
}
