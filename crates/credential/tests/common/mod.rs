//! Shared fixtures for rotation integration tests
//!
//! Every external boundary is an in-memory fake with switches for injecting
//! a failure at exactly one step.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use keyshift_credential::audit::{AuditEntry, AuditError, AuditEvent, AuditSink, MemoryAuditSink};
use keyshift_credential::backup::{Backup, BackupBackend, BackupError, BackupLabel, MemoryBackupBackend};
use keyshift_credential::keygen::{GenerationError, KeyGenerator, RsaKeyGenerator};
use keyshift_credential::lease::LeaseStore;
use keyshift_credential::precondition::PreconditionValidator;
use keyshift_credential::remote::{CredentialUpdater, InMemoryRemoteAccount, RemoteError, VerifyOutcome};
use keyshift_credential::slot::{ActiveKeySlot, MemoryKeySlot, SlotError};
use keyshift_credential::{
    AccountId, BackupId, EncryptionKey, KeyPair, PrivateKey, PublicKey, RotationAttempt, RotationState,
    Rotator, RotatorConfig,
};
use keyshift_credential::rotation::RetryPolicy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub const TEST_KEY_BITS: usize = 1024;

pub fn account() -> AccountId {
    AccountId::new("teams_bot_user").unwrap()
}

pub async fn fresh_key() -> KeyPair {
    RsaKeyGenerator::new(TEST_KEY_BITS).generate().await.unwrap()
}

/// A fresh key that claims to be `days` old
pub async fn aged_key(days: i64) -> KeyPair {
    let key = fresh_key().await;
    let private_key = PrivateKey::from_pkcs8_der(key.private_key().as_pkcs8_der()).unwrap();
    KeyPair::from_private_key(private_key, Utc::now() - chrono::Duration::days(days)).unwrap()
}

/// Route `tracing` output to the test harness when `RUST_LOG` is set
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() && std::env::var_os("KEYSHIFT_LOG").is_none() {
        return;
    }
    let config = keyshift_log::Config {
        writer: keyshift_log::Writer::Test,
        ..keyshift_log::Config::from_env()
    };
    // Already installed by an earlier test in this binary
    let _ = keyshift_log::LoggerBuilder::from_config(config).build();
}

// ── Generator ──────────────────────────────────────────────────────────────

/// RSA generator that fails its first `failures` calls
pub struct FlakyGenerator {
    inner: RsaKeyGenerator,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyGenerator {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: RsaKeyGenerator::new(TEST_KEY_BITS),
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyGenerator for FlakyGenerator {
    async fn generate(&self) -> Result<KeyPair, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GenerationError::Failed("injected generator fault".into()));
        }
        self.inner.generate().await
    }

    fn validate_format(&self, public_key: &str) -> bool {
        self.inner.validate_format(public_key)
    }
}

// ── Remote ─────────────────────────────────────────────────────────────────

/// Simulated remote account with injectable push and verify faults
pub struct FaultyRemote {
    pub account: InMemoryRemoteAccount,
    push_failures: AtomicU32,
    refuse_new_keys: AtomicBool,
    refuse_all: AtomicBool,
    trusted: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    delay: Mutex<Duration>,
    pushes: AtomicU32,
    verifies: AtomicU32,
}

impl FaultyRemote {
    pub fn new(installed: Option<&PublicKey>) -> Self {
        let account = match installed {
            Some(key) => InMemoryRemoteAccount::with_key(key),
            None => InMemoryRemoteAccount::new(),
        };
        Self {
            account,
            push_failures: AtomicU32::new(0),
            refuse_new_keys: AtomicBool::new(false),
            refuse_all: AtomicBool::new(false),
            trusted: Mutex::new(installed.map(PublicKey::fingerprint).into_iter().collect()),
            gate: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            pushes: AtomicU32::new(0),
            verifies: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` pushes
    pub fn fail_pushes(&self, n: u32) {
        self.push_failures.store(n, Ordering::SeqCst);
    }

    /// Verification fails for every key the account did not start with
    pub fn refuse_new_keys(&self) {
        self.refuse_new_keys.store(true, Ordering::SeqCst);
    }

    /// Verification fails for every key
    pub fn refuse_all(&self) {
        self.refuse_all.store(true, Ordering::SeqCst);
    }

    /// Block the next push until the returned `Notify` is signalled
    pub fn hold_next_push(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Every push and verify takes `delay` before answering
    pub fn delay_calls(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    async fn slow_down(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn pushes(&self) -> u32 {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> u32 {
        self.verifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialUpdater for FaultyRemote {
    async fn update_public_key(&self, public_key: &PublicKey) -> Result<(), RemoteError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.slow_down().await;

        let failing = self
            .push_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Unavailable("injected push fault".into()));
        }
        self.account.update_public_key(public_key).await
    }

    async fn verify_connection(&self, pair: &KeyPair) -> VerifyOutcome {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.slow_down().await;

        if self.refuse_all.load(Ordering::SeqCst) {
            return VerifyOutcome::AuthFailed("injected: authentication disabled".into());
        }
        let fingerprint = pair.public_key().fingerprint();
        if self.refuse_new_keys.load(Ordering::SeqCst) && !self.trusted.lock().contains(&fingerprint) {
            return VerifyOutcome::AuthFailed(format!("injected: {fingerprint} refused"));
        }
        self.account.verify_connection(pair).await
    }
}

// ── Slot ───────────────────────────────────────────────────────────────────

/// Memory slot whose next `n` installs fail
pub struct FaultySlot {
    inner: MemoryKeySlot,
    install_failures: AtomicU32,
}

impl FaultySlot {
    pub fn new(installed: Option<&KeyPair>) -> Self {
        Self {
            inner: installed.map_or_else(MemoryKeySlot::new, MemoryKeySlot::with_key),
            install_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_installs(&self, n: u32) {
        self.install_failures.store(n, Ordering::SeqCst);
    }

    pub async fn fingerprint(&self) -> Option<String> {
        self.inner
            .current()
            .await
            .unwrap()
            .map(|pair| pair.public_key().fingerprint())
    }
}

#[async_trait]
impl ActiveKeySlot for FaultySlot {
    async fn current(&self) -> Result<Option<KeyPair>, SlotError> {
        self.inner.current().await
    }

    async fn install(&self, pair: &KeyPair) -> Result<(), SlotError> {
        let failing = self
            .install_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SlotError::Write("injected slot fault".into()));
        }
        self.inner.install(pair).await
    }
}

// ── Backups ────────────────────────────────────────────────────────────────

/// Memory backend that refuses or holds writes for chosen labels
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackupBackend,
    refused: Mutex<HashSet<BackupLabel>>,
    held: Mutex<Option<(BackupLabel, Arc<Notify>)>>,
}

impl FaultyBackend {
    pub fn refuse(&self, label: BackupLabel) {
        self.refused.lock().insert(label);
    }

    /// Block the next `label` write until the returned `Notify` is signalled
    pub fn hold_next_store(&self, label: BackupLabel) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held.lock() = Some((label, Arc::clone(&gate)));
        gate
    }
}

#[async_trait]
impl BackupBackend for FaultyBackend {
    async fn insert(&self, backup: &Backup) -> Result<(), BackupError> {
        let gate = {
            let mut held = self.held.lock();
            match held.as_ref() {
                Some((label, _)) if *label == backup.label => held.take().map(|(_, gate)| gate),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.refused.lock().contains(&backup.label) {
            return Err(BackupError::Write(format!("injected: {} refused", backup.label)));
        }
        self.inner.insert(backup).await
    }

    async fn get(&self, account: &AccountId, id: BackupId) -> Result<Option<Backup>, BackupError> {
        self.inner.get(account, id).await
    }

    async fn list(&self, account: &AccountId) -> Result<Vec<Backup>, BackupError> {
        self.inner.list(account).await
    }
}

// ── Audit ──────────────────────────────────────────────────────────────────

/// Sink that rejects every entry
pub struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn send(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Delivery("injected sink fault".into()))
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

/// Knobs for [`Harness::build`]
pub struct Options {
    pub installed_key: bool,
    pub key_age_days: i64,
    pub generation_failures: u32,
    pub auto_push: bool,
    pub backup_key: EncryptionKey,
    pub backend: Option<Arc<FaultyBackend>>,
    pub leases: Option<Arc<dyn LeaseStore>>,
    pub validator: Option<Arc<dyn PreconditionValidator>>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
    /// Applied to the test configuration before the rotator is built
    pub tune: fn(&mut RotatorConfig),
}

impl Default for Options {
    fn default() -> Self {
        Self {
            installed_key: true,
            key_age_days: 0,
            generation_failures: 0,
            auto_push: false,
            backup_key: EncryptionKey::from_bytes([7u8; 32]),
            backend: None,
            leases: None,
            validator: None,
            audit_sink: None,
            tune: |_| {},
        }
    }
}

/// A rotator wired to fakes, plus handles on every fake
pub struct Harness {
    pub rotator: Rotator,
    pub generator: Arc<FlakyGenerator>,
    pub remote: Arc<FaultyRemote>,
    pub slot: Arc<FaultySlot>,
    pub backend: Arc<FaultyBackend>,
    pub audit: Arc<MemoryAuditSink>,
    pub original: Option<KeyPair>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(Options::default()).await
    }

    pub async fn build(options: Options) -> Self {
        init_tracing();

        let original = if options.installed_key {
            Some(aged_key(options.key_age_days).await)
        } else {
            None
        };

        let generator = Arc::new(FlakyGenerator::new(options.generation_failures));
        let remote = Arc::new(FaultyRemote::new(original.as_ref().map(KeyPair::public_key)));
        let slot = Arc::new(FaultySlot::new(original.as_ref()));
        let backend = options.backend.unwrap_or_default();
        let audit = Arc::new(MemoryAuditSink::new());

        let mut config = RotatorConfig::new(account());
        config.generation_retry = RetryPolicy::immediate(3);
        config.emergency_auto_push = options.auto_push;
        (options.tune)(&mut config);

        let mut builder = Rotator::builder(config)
            .generator(Arc::clone(&generator) as Arc<dyn KeyGenerator>)
            .backups(Arc::clone(&backend) as Arc<dyn BackupBackend>, options.backup_key)
            .remote(Arc::clone(&remote) as Arc<dyn CredentialUpdater>)
            .slot(Arc::clone(&slot) as Arc<dyn ActiveKeySlot>)
            .audit_sink(
                options
                    .audit_sink
                    .unwrap_or_else(|| Arc::clone(&audit) as Arc<dyn AuditSink>),
            );
        if let Some(leases) = options.leases {
            builder = builder.leases(leases);
        }
        if let Some(validator) = options.validator {
            builder = builder.validator(validator);
        }

        Self {
            rotator: builder.build().unwrap(),
            generator,
            remote,
            slot,
            backend,
            audit,
            original,
        }
    }

    pub fn original(&self) -> &KeyPair {
        self.original.as_ref().unwrap()
    }

    /// Whether the key currently in the slot authenticates remotely
    pub async fn active_key_authenticates(&self) -> bool {
        match self.slot.current().await.unwrap() {
            Some(pair) => self.remote.account.authenticates(&pair),
            None => false,
        }
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.rotator.flush_audit().await;
        self.audit.entries()
    }

    /// Audit events recorded for `attempt`
    pub async fn events_for(&self, attempt: &RotationAttempt) -> Vec<AuditEvent> {
        self.audit_entries()
            .await
            .into_iter()
            .filter(|entry| entry.attempt_id == attempt.id)
            .map(|entry| entry.event)
            .collect()
    }
}

/// States visited, starting with `Idle`
pub fn path(attempt: &RotationAttempt) -> Vec<RotationState> {
    attempt.history.clone()
}
