//! File helpers for the local backends
//!
//! Every write lands in a sibling temp file first, gets 0600 permissions on
//! Unix, and is then moved into place, so readers see either the old file or
//! the complete new one.

use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn temp_path(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("keyshift"),
        Uuid::new_v4()
    ))
}

async fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    tokio::fs::write(path, data).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

/// Create `dir` (and parents) with owner-only permissions if missing
pub async fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        return Ok(());
    }

    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(dir, perms).await?;
    }

    Ok(())
}

/// Atomically write `data` to `path`, replacing any existing file
///
/// # Errors
///
/// Returns I/O error if write, permission setting, or rename fails
pub async fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    if let Err(e) = write_private(&temp, data).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    // Same directory, so the rename is atomic
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    Ok(())
}

/// Atomically create `path` with `data`, never replacing an existing file
///
/// # Errors
///
/// Returns [`io::ErrorKind::AlreadyExists`] if `path` exists, or the I/O
/// error from writing the temp file
pub async fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    if let Err(e) = write_private(&temp, data).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    // hard_link fails with AlreadyExists instead of replacing the target
    let linked = tokio::fs::hard_link(&temp, path).await;
    let _ = tokio::fs::remove_file(&temp).await;
    linked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn private_dir_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        ensure_private_dir(&nested).await.unwrap();
        ensure_private_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.json");

        atomic_write(&path, b"one").await.unwrap();
        atomic_write(&path, b"two").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn write_new_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bk-1.json");

        write_new(&path, b"first").await.unwrap();
        let err = write_new(&path, b"second").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lease.json");
        atomic_write(&path, b"x").await.unwrap();
        let _ = write_new(&path, b"y").await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["lease.json".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bk-2.json");
        write_new(&path, b"x").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
