//! Rotate a simulated service user's key, then run emergency recovery
//!
//! ```text
//! KEYSHIFT_LOG=info cargo run -p keyshift-credential --example in_memory_rotation
//! ```

use keyshift_credential::keygen::RsaKeyGenerator;
use keyshift_credential::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = keyshift_log::init()?;

    let account = AccountId::new("teams_bot_user")?;
    let config = RotatorConfig::new(account);

    // The account starts with a key nobody has rotated yet
    let original = RsaKeyGenerator::new(config.key_bits).generate().await?;
    let remote = Arc::new(InMemoryRemoteAccount::with_key(original.public_key()));
    let slot = Arc::new(MemoryKeySlot::with_key(&original));

    let rotator = Rotator::builder(config)
        .backups(Arc::new(MemoryBackupBackend::new()), EncryptionKey::generate())
        .remote(Arc::clone(&remote) as Arc<dyn CredentialUpdater>)
        .slot(Arc::clone(&slot) as Arc<dyn ActiveKeySlot>)
        .build()?;

    let attempt = rotator.run_scheduled().await?;
    println!("scheduled: {} via {:?}", attempt.state, attempt.history);

    let recovery = rotator
        .run_emergency(EmergencyRequest::new(
            Caller::new("oncall"),
            "drill: restore newest backup",
        ))
        .await?;
    println!(
        "emergency: {} (restored {:?})",
        recovery.state, recovery.restored_backup
    );

    for backup in rotator.list_backups().await? {
        println!(
            "{} {:<11} {} {}",
            backup.id,
            backup.label.to_string(),
            backup.fingerprint,
            if backup.is_valid() { "ok" } else { "INVALID" }
        );
    }

    let live = slot.current().await?.ok_or("no key installed")?;
    println!("live key authenticates: {}", remote.authenticates(&live));

    rotator.flush_audit().await;
    Ok(())
}
