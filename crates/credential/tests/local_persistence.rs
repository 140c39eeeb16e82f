//! Integration tests for the filesystem backends
//!
//! A rotation written through one rotator must be readable by a fresh one
//! pointed at the same directories, as after a process restart.

mod common;

use common::{FaultyRemote, FlakyGenerator, account, fresh_key};
use keyshift_credential::audit::MemoryAuditSink;
use keyshift_credential::backup::{BackupLabel, LocalBackupBackend};
use keyshift_credential::lease::{LeaseStore, LocalLeaseStore};
use keyshift_credential::remote::CredentialUpdater;
use keyshift_credential::rotation::RetryPolicy;
use keyshift_credential::slot::{ActiveKeySlot, LocalKeySlot};
use keyshift_credential::{EncryptionKey, KeyPair, RotationError, Rotator, RotatorConfig};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Dirs {
    _root: TempDir,
    backups: std::path::PathBuf,
    slot: std::path::PathBuf,
    leases: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let root = TempDir::new().unwrap();
    let base = root.path().to_path_buf();
    Dirs {
        backups: base.join("backups"),
        slot: base.join("active.key"),
        leases: base.join("leases"),
        _root: root,
    }
}

fn backup_key() -> EncryptionKey {
    EncryptionKey::from_bytes([11u8; 32])
}

fn slot_key() -> EncryptionKey {
    EncryptionKey::from_bytes([12u8; 32])
}

fn rotator(dirs: &Dirs, remote: &Arc<FaultyRemote>) -> Rotator {
    let mut config = RotatorConfig::new(account());
    config.generation_retry = RetryPolicy::immediate(3);

    Rotator::builder(config)
        .generator(Arc::new(FlakyGenerator::new(0)))
        .backups(Arc::new(LocalBackupBackend::new(&dirs.backups)), backup_key())
        .remote(Arc::clone(remote) as Arc<dyn CredentialUpdater>)
        .slot(Arc::new(LocalKeySlot::new(&dirs.slot, slot_key())))
        .leases(Arc::new(LocalLeaseStore::new(&dirs.leases)))
        .audit_sink(Arc::new(MemoryAuditSink::new()))
        .build()
        .unwrap()
}

async fn install(path: &Path, pair: &KeyPair) {
    LocalKeySlot::new(path, slot_key()).install(pair).await.unwrap();
}

#[tokio::test]
async fn test_rotation_survives_restart() {
    // GIVEN: An installed key on disk
    let dirs = dirs();
    let original = fresh_key().await;
    install(&dirs.slot, &original).await;
    let remote = Arc::new(FaultyRemote::new(Some(original.public_key())));

    // WHEN: One rotator instance rotates
    let attempt = rotator(&dirs, &remote).run_scheduled().await.unwrap();
    assert!(attempt.is_succeeded());

    // THEN: A fresh instance over the same directories sees the result
    let restarted = rotator(&dirs, &remote);
    let backups = restarted.list_backups().await.unwrap();
    assert_eq!(backups.len(), 2);
    assert_eq!(Some(backups[0].id), attempt.post_backup);
    assert_eq!(backups[0].label, BackupLabel::PostUpdate);
    assert_eq!(Some(backups[1].id), attempt.pre_backup);
    assert_eq!(backups[1].fingerprint, original.public_key().fingerprint());
    assert!(backups.iter().all(|b| b.is_valid()));

    let live = LocalKeySlot::new(&dirs.slot, slot_key())
        .current()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.public_key().fingerprint(), backups[0].fingerprint);
    assert!(remote.account.authenticates(&live));

    // THEN: The lease was released, so the next run proceeds
    let next = restarted.run_scheduled().await.unwrap();
    assert!(next.is_succeeded());
    assert!(next.pre_backup.unwrap() > attempt.post_backup.unwrap());
}

#[tokio::test]
async fn test_lease_on_disk_blocks_other_instances() {
    // GIVEN: Another process holds the lease file
    let dirs = dirs();
    let original = fresh_key().await;
    install(&dirs.slot, &original).await;
    let remote = Arc::new(FaultyRemote::new(Some(original.public_key())));

    let other = LocalLeaseStore::new(&dirs.leases);
    let held = other
        .try_acquire(&account(), "host-b", Duration::from_secs(600))
        .await
        .unwrap()
        .unwrap();

    // WHEN: This instance tries to rotate
    let result = rotator(&dirs, &remote).run_scheduled().await;

    // THEN: It is rejected and nothing changed
    assert!(matches!(
        result,
        Err(RotationError::RotationInProgress { ref holder, .. }) if holder == "host-b"
    ));
    assert_eq!(remote.pushes(), 0);

    // WHEN: The holder releases
    other.release(&held).await.unwrap();

    // THEN: This instance proceeds
    assert!(rotator(&dirs, &remote).run_scheduled().await.unwrap().is_succeeded());
}

#[tokio::test]
async fn test_backups_sealed_with_another_key_are_invalid() {
    // GIVEN: Backups written under one backup key
    let dirs = dirs();
    let original = fresh_key().await;
    install(&dirs.slot, &original).await;
    let remote = Arc::new(FaultyRemote::new(Some(original.public_key())));
    rotator(&dirs, &remote).run_scheduled().await.unwrap();

    // WHEN: They are listed by a rotator holding a different key
    let mut config = RotatorConfig::new(account());
    config.generation_retry = RetryPolicy::immediate(3);
    let other = Rotator::builder(config)
        .generator(Arc::new(FlakyGenerator::new(0)))
        .backups(
            Arc::new(LocalBackupBackend::new(&dirs.backups)),
            EncryptionKey::from_bytes([99u8; 32]),
        )
        .remote(Arc::clone(&remote) as Arc<dyn CredentialUpdater>)
        .slot(Arc::new(LocalKeySlot::new(&dirs.slot, slot_key())))
        .build()
        .unwrap();

    // THEN: Every backup reports why it cannot be used
    let backups = other.list_backups().await.unwrap();
    assert_eq!(backups.len(), 2);
    assert!(backups.iter().all(|b| !b.is_valid()));
}
