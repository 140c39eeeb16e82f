//! Filesystem backup backend
//!
//! Layout: `<root>/<account>/bk-<micros>.json`, one JSON document per backup.
//! Files are created through a temp file and a hard link, so an existing
//! backup is never replaced and readers never see a partial file.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

use super::{Backup, BackupBackend, BackupError};
use crate::core::{AccountId, BackupId};
use crate::utils::{ensure_private_dir, write_new};

const FILE_EXTENSION: &str = "json";

/// Backups stored as files under a root directory
#[derive(Debug, Clone)]
pub struct LocalBackupBackend {
    root: PathBuf,
}

impl LocalBackupBackend {
    /// Backend rooted at `root`; directories are created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn account_dir(&self, account: &AccountId) -> PathBuf {
        self.root.join(account.as_str())
    }

    fn file_path(&self, account: &AccountId, id: BackupId) -> PathBuf {
        self.account_dir(account)
            .join(format!("{id}.{FILE_EXTENSION}"))
    }

    async fn read_backup(path: &Path) -> Result<Option<Backup>, BackupError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackupError::Read(format!("{}: {e}", path.display()))),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BackupError::Read(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl BackupBackend for LocalBackupBackend {
    async fn insert(&self, backup: &Backup) -> Result<(), BackupError> {
        let dir = self.account_dir(&backup.account);
        ensure_private_dir(&dir)
            .await
            .map_err(|e| BackupError::Write(format!("{}: {e}", dir.display())))?;

        let json =
            serde_json::to_vec_pretty(backup).map_err(|e| BackupError::Write(e.to_string()))?;

        let path = self.file_path(&backup.account, backup.id);
        match write_new(&path, &json).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(BackupError::AlreadyExists(backup.id))
            }
            Err(e) => Err(BackupError::Write(format!("{}: {e}", path.display()))),
        }
    }

    async fn get(&self, account: &AccountId, id: BackupId) -> Result<Option<Backup>, BackupError> {
        let path = self.file_path(account, id);
        match Self::read_backup(&path).await {
            Err(BackupError::Read(reason)) if path.exists() => {
                Err(BackupError::Corrupt { id, reason })
            }
            other => other,
        }
    }

    async fn list(&self, account: &AccountId) -> Result<Vec<Backup>, BackupError> {
        let dir = self.account_dir(account);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::Read(format!("{}: {e}", dir.display()))),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::Read(e.to_string()))?
        {
            let path = entry.path();
            let is_backup = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.parse::<BackupId>().is_ok())
                && path.extension().and_then(|ext| ext.to_str()) == Some(FILE_EXTENSION);
            if !is_backup {
                continue;
            }

            match Self::read_backup(&path).await {
                Ok(Some(backup)) => backups.push(backup),
                Ok(None) => {}
                Err(e) => {
                    // Unreadable files cannot be candidates; keep listing the rest
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup file");
                }
            }
        }

        Ok(backups)
    }

    async fn latest_id(&self, account: &AccountId) -> Result<Option<BackupId>, BackupError> {
        let dir = self.account_dir(account);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackupError::Read(format!("{}: {e}", dir.display()))),
        };

        let mut latest = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::Read(e.to_string()))?
        {
            let id = entry
                .path()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<BackupId>().ok());
            latest = latest.max(id);
        }

        Ok(latest)
    }
}
