//! Rotation Orchestrator
//!
//! Drives a [`RotationAttempt`] through the state machine for every flow.
//! The remote account keeps a key that authenticates at every step: the
//! working key is backed up before the remote is touched, a pushed key only
//! replaces the installed one after it authenticated, and every failure after
//! the push puts the backed-up key back.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::attempt::{AttemptFailure, Flow, RotationAttempt};
use super::emergency::EmergencyRequest;
use super::error::{RotationError, RotationResult};
use super::manual::{ManualRequest, ManualRotationHandle};
use super::policy::{ExpiryStatus, KeyAgePolicy, ScheduleDecision};
use super::state::RotationState;
use crate::audit::{AuditDispatcher, AuditEvent, AuditScope, AuditSink, TracingAuditSink};
use crate::backup::{BackupBackend, BackupLabel, BackupStore};
use crate::config::{ConfigError, RotatorConfig};
use crate::core::{AccountId, AttemptId, BackupId, KeyPair, PublicKey};
use crate::keygen::{GenerationError, KeyGenerator, RsaKeyGenerator};
use crate::lease::{Lease, LeaseError, LeaseStore, MemoryLeaseStore};
use crate::precondition::{
    Caller, PreconditionValidator, Readiness, SystemPreconditions, ValidationContext,
};
use crate::remote::{
    CredentialUpdater, RemoteError, VerifyOutcome, push_with_timeout, verify_with_timeout,
};
use crate::slot::ActiveKeySlot;
use crate::utils::EncryptionKey;

/// What an attempt will do once it holds the lease
pub(super) enum Plan {
    /// Full rotation on behalf of `caller`
    Rotate(Caller),
    /// Operator-triggered recovery
    Emergency(EmergencyRequest),
    /// Put one specific backup back
    RestoreBackup(BackupId),
    /// Generate and store an emergency key
    EmergencyKey,
    /// Verify and install an emergency key an operator pushed by hand
    ConfirmPush(BackupId),
}

/// A failure and the state the attempt was in when it happened
pub(super) struct Fault {
    pub(super) state: RotationState,
    pub(super) cause: RotationError,
}

/// Why a rotation is being unwound
pub(super) enum Unwind {
    Fail(Fault),
    Cancel,
}

/// Keep `lease` alive until `stop` fires
///
/// Renews every third of `ttl`. Cancels `lost` and returns once the lease
/// belongs to someone else.
async fn heartbeat(
    leases: Arc<dyn LeaseStore>,
    mut lease: Lease,
    ttl: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let period = ttl / 3;
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            () = tokio::time::sleep(period) => {}
        }

        match leases.renew(&lease, ttl).await {
            Ok(renewed) => {
                tracing::trace!(expires_at = %renewed.expires_at, "Rotation lease renewed");
                lease = renewed;
            }
            Err(e @ LeaseError::Lost { .. }) => {
                tracing::error!(error = %e, "Rotation lease lost");
                lost.cancel();
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to renew rotation lease"),
        }
    }
}

pub(super) struct RotatorInner {
    pub(super) config: RotatorConfig,
    pub(super) validator: Arc<dyn PreconditionValidator>,
    pub(super) generator: Arc<dyn KeyGenerator>,
    pub(super) backups: BackupStore,
    pub(super) remote: Arc<dyn CredentialUpdater>,
    pub(super) slot: Arc<dyn ActiveKeySlot>,
    pub(super) leases: Arc<dyn LeaseStore>,
    pub(super) audit: AuditDispatcher,
    pub(super) scheduler: Caller,
    pub(super) status: watch::Sender<Option<RotationAttempt>>,
    pub(super) manual: Mutex<Option<(AttemptId, CancellationToken)>>,
}

impl RotatorInner {
    async fn acquire(&self, attempt_id: AttemptId) -> RotationResult<Lease> {
        let account = &self.config.account;
        let holder = attempt_id.to_string();

        if let Some(lease) = self
            .leases
            .try_acquire(account, &holder, self.config.lease_ttl)
            .await?
        {
            return Ok(lease);
        }

        let holder = match self.leases.current(account).await {
            Ok(Some(lease)) => lease.holder,
            _ => "unknown".to_string(),
        };
        tracing::warn!(account = %account, holder = %holder, "Rotation already in progress");
        Err(RotationError::RotationInProgress {
            account: account.clone(),
            holder,
        })
    }

    async fn release(&self, lease: &Lease) {
        match self.leases.release(lease).await {
            Ok(()) => {}
            Err(e @ LeaseError::Lost { .. }) => {
                tracing::error!(account = %lease.account, error = %e, "Rotation lease was taken over");
            }
            Err(e) => {
                tracing::warn!(account = %lease.account, error = %e, "Failed to release rotation lease");
            }
        }
    }

    /// Run `plan` for `attempt` under `lease`, releasing it at the end
    pub(super) async fn run_attempt(
        &self,
        attempt: RotationAttempt,
        lease: Lease,
        plan: Plan,
        cancel: CancellationToken,
        updates: watch::Sender<RotationAttempt>,
    ) -> RotationResult<RotationAttempt> {
        let span = tracing::info_span!(
            "rotation",
            attempt_id = %attempt.id,
            account = %attempt.account,
            flow = %attempt.flow,
        );

        async move {
            let attempt_id = attempt.id;
            let stop = CancellationToken::new();
            let lost = CancellationToken::new();
            let renewals = tokio::spawn(
                heartbeat(
                    Arc::clone(&self.leases),
                    lease.clone(),
                    self.config.lease_ttl,
                    stop.clone(),
                    lost.clone(),
                )
                .in_current_span(),
            );

            let mut run = Run::new(self, attempt, cancel, lost, updates);
            run.publish();

            let outcome = match plan {
                Plan::Rotate(caller) => run.rotate(&caller).await,
                Plan::Emergency(request) => run.emergency(&request).await,
                Plan::RestoreBackup(id) => run.restore_backup(id).await,
                Plan::EmergencyKey => run.generate_emergency_key().await,
                Plan::ConfirmPush(id) => run.confirm_manual_push(id).await,
            };

            stop.cancel();
            if let Err(e) = renewals.await {
                tracing::warn!(error = %e, "Lease heartbeat ended abnormally");
            }
            self.release(&lease).await;
            {
                let mut manual = self.manual.lock();
                if manual.as_ref().is_some_and(|(id, _)| *id == attempt_id) {
                    *manual = None;
                }
            }

            match outcome {
                Ok(()) => Ok(run.attempt),
                Err(e) => {
                    tracing::error!(error = %e, state = %run.attempt.state, "Attempt aborted");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// One attempt in flight
pub(super) struct Run<'a> {
    pub(super) inner: &'a RotatorInner,
    pub(super) attempt: RotationAttempt,
    pub(super) scope: AuditScope,
    cancel: CancellationToken,
    // Cleared once the remote has been touched past the point of no return
    cancellable: bool,
    lease_lost: CancellationToken,
    updates: watch::Sender<RotationAttempt>,
}

impl<'a> Run<'a> {
    fn new(
        inner: &'a RotatorInner,
        attempt: RotationAttempt,
        cancel: CancellationToken,
        lease_lost: CancellationToken,
        updates: watch::Sender<RotationAttempt>,
    ) -> Self {
        let scope = AuditScope {
            attempt_id: attempt.id,
            account: attempt.account.clone(),
            flow: attempt.flow,
        };
        Self {
            inner,
            attempt,
            scope,
            cancel,
            cancellable: true,
            lease_lost,
            updates,
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.attempt.clone());
        self.inner.status.send_replace(Some(self.attempt.clone()));
    }

    pub(super) fn advance(&mut self, to: RotationState) -> RotationResult<()> {
        let from = self.attempt.transition_to(to)?;
        tracing::info!(from = %from, to = %to, "State transition");
        self.inner
            .audit
            .emit(&self.scope, AuditEvent::Transition { from, to });
        self.publish();
        Ok(())
    }

    fn finish(&mut self, state: RotationState, fault: Option<Fault>) -> RotationResult<()> {
        let failure = fault.map(|fault| AttemptFailure {
            attempt_id: self.attempt.id,
            state: fault.state,
            cause: fault.cause,
        });
        if let Some(failure) = &failure {
            self.attempt.last_error = Some(failure.cause.clone());
        }
        self.attempt.failure = failure.clone();

        self.advance(state)?;

        match &failure {
            Some(failure) => tracing::error!(
                failed_in = %failure.state,
                cause = %failure.cause,
                "Rotation attempt failed"
            ),
            None => tracing::info!(state = %state, "Rotation attempt finished"),
        }
        self.inner
            .audit
            .emit(&self.scope, AuditEvent::Terminal { state, failure });
        Ok(())
    }

    /// `cause` at the current state
    pub(super) fn fault(&self, cause: RotationError) -> Fault {
        Fault {
            state: self.attempt.state,
            cause,
        }
    }

    pub(super) fn fail(&mut self, cause: RotationError) -> RotationResult<()> {
        let fault = self.fault(cause);
        self.fail_with(fault)
    }

    /// Fail with a fault raised in an earlier state
    pub(super) fn fail_with(&mut self, fault: Fault) -> RotationResult<()> {
        self.finish(RotationState::Failed, Some(fault))
    }

    pub(super) fn succeed(&mut self) -> RotationResult<()> {
        self.finish(RotationState::Succeeded, None)
    }

    fn cancelled(&mut self) -> RotationResult<()> {
        tracing::info!(state = %self.attempt.state, "Cancellation honoured");
        self.finish(RotationState::Cancelled, None)
    }

    fn cancel_requested(&self) -> bool {
        self.cancellable && self.cancel.is_cancelled()
    }

    pub(super) fn stop_cancellation(&mut self) {
        self.cancellable = false;
    }

    /// Boundary before the remote update
    ///
    /// A lapsed lease fails the attempt, since another rotation may already
    /// own the account; otherwise a cancel request is honoured. `Some`
    /// carries the outcome once the attempt has ended. Past the push neither
    /// applies and the attempt runs to the end.
    fn checkpoint(&mut self) -> Option<RotationResult<()>> {
        if !self.cancellable {
            return None;
        }
        if self.lease_lost.is_cancelled() {
            tracing::error!(state = %self.attempt.state, "Rotation lease lapsed; stopping before the remote update");
            let lost = LeaseError::Lost {
                account: self.attempt.account.clone(),
                holder: self.attempt.id.to_string(),
            };
            return Some(self.fail(lost.into()));
        }
        if self.cancel.is_cancelled() {
            return Some(self.cancelled());
        }
        None
    }

    pub(super) fn note(&mut self, error: RotationError) {
        tracing::warn!(error = %error, state = %self.attempt.state, "Recoverable failure");
        self.attempt.last_error = Some(error);
    }

    pub(super) async fn push(&self, public_key: &PublicKey) -> Result<(), RemoteError> {
        push_with_timeout(
            self.inner.remote.as_ref(),
            public_key,
            self.inner.config.remote_timeout,
        )
        .await
    }

    /// Prove `pair` authenticates
    pub(super) async fn verify(&self, pair: &KeyPair) -> Result<(), RotationError> {
        match verify_with_timeout(
            self.inner.remote.as_ref(),
            pair,
            self.inner.config.remote_timeout,
        )
        .await
        {
            VerifyOutcome::Authenticated => Ok(()),
            VerifyOutcome::AuthFailed(reason) => Err(RotationError::AuthFailed {
                fingerprint: pair.public_key().fingerprint(),
                reason,
            }),
        }
    }

    async fn generate_once(&self) -> Result<KeyPair, GenerationError> {
        let pair = self.inner.generator.generate().await?;
        if !self
            .inner
            .generator
            .validate_format(pair.public_key().as_str())
        {
            return Err(GenerationError::InvalidFormat);
        }
        Ok(pair)
    }

    /// Generate under the retry budget
    ///
    /// `Ok(None)` means the attempt already reached a terminal state.
    pub(super) async fn generate(&mut self) -> RotationResult<Option<KeyPair>> {
        let inner = self.inner;
        let policy = &inner.config.generation_retry;
        let mut made = 0;

        loop {
            if self.cancel_requested() {
                self.cancelled()?;
                return Ok(None);
            }
            self.advance(RotationState::Generating)?;
            if let Some(halt) = self.checkpoint() {
                halt?;
                return Ok(None);
            }

            let error = match self.generate_once().await {
                Ok(pair) => return Ok(Some(pair)),
                Err(e) => e,
            };
            made += 1;
            tracing::warn!(
                attempt = made,
                max_attempts = policy.max_attempts,
                error = %error,
                "Key generation failed"
            );

            let cause = RotationError::Generation {
                attempts: made,
                source: error,
            };
            if !policy.allows_another(made) {
                inner.audit.emit(
                    &self.scope,
                    AuditEvent::EscalationNotice {
                        reason: cause.to_string(),
                    },
                );
                self.fail(cause)?;
                return Ok(None);
            }

            self.attempt.last_error = Some(cause);
            self.attempt.retry_count += 1;
            self.advance(RotationState::RetryingGeneration)?;

            let backoff = policy.backoff_duration(made - 1);
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = self.cancel.cancelled(), if self.cancellable => {}
                () = self.lease_lost.cancelled(), if self.cancellable => {}
            }
        }
    }

    /// Scheduled and Manual flows
    async fn rotate(&mut self, caller: &Caller) -> RotationResult<()> {
        self.advance(RotationState::Validating)?;
        if let Some(halt) = self.checkpoint() {
            return halt;
        }

        let context = ValidationContext {
            account: self.attempt.account.clone(),
            flow: self.attempt.flow,
            caller: caller.clone(),
        };
        if let Readiness::Blocked(reason) = self.inner.validator.validate(&context) {
            tracing::warn!(reason = %reason, "Preconditions not met");
            return self.fail(RotationError::BlockedPrecondition(reason));
        }

        let current = match self.inner.slot.current().await {
            Ok(current) => current,
            Err(e) => return self.fail(e.into()),
        };

        let Some(pair) = self.generate().await? else {
            return Ok(());
        };
        if let Some(halt) = self.checkpoint() {
            return halt;
        }

        match &current {
            Some(working) => {
                self.advance(RotationState::BackingUp(BackupLabel::PreUpdate))?;
                match self
                    .inner
                    .backups
                    .store(working, BackupLabel::PreUpdate, &self.scope)
                    .await
                {
                    Ok(backup) => self.attempt.pre_backup = Some(backup.id),
                    Err(e) => return self.fail(RotationError::BackupWrite(e)),
                }
                if let Some(halt) = self.checkpoint() {
                    return halt;
                }
            }
            None => tracing::warn!("No active key installed; first rotation has nothing to back up"),
        }

        self.advance(RotationState::Updating)?;
        let pushed = self.push(pair.public_key()).await;
        if let Err(e) = pushed {
            return self.roll_back(Unwind::Fail(self.fault(e.into()))).await;
        }
        if self.cancel_requested() {
            tracing::warn!("Cancelled after the remote update; rolling back");
            return self.roll_back(Unwind::Cancel).await;
        }
        self.stop_cancellation();

        self.advance(RotationState::Verifying)?;
        if let Err(e) = self.verify(&pair).await {
            return self.roll_back(Unwind::Fail(self.fault(e))).await;
        }

        self.advance(RotationState::BackingUp(BackupLabel::PostUpdate))?;
        match self
            .inner
            .backups
            .store(&pair, BackupLabel::PostUpdate, &self.scope)
            .await
        {
            Ok(backup) => self.attempt.post_backup = Some(backup.id),
            Err(e) => {
                let fault = self.fault(RotationError::BackupWrite(e));
                return self.roll_back(Unwind::Fail(fault)).await;
            }
        }
        if let Err(e) = self.inner.slot.install(&pair).await {
            return self.roll_back(Unwind::Fail(self.fault(e.into()))).await;
        }

        tracing::info!(
            fingerprint = %pair.public_key().fingerprint(),
            "Rotated to new key"
        );
        self.succeed()
    }

    /// Put the pre-update key back; escalate if that fails
    ///
    /// A failed attempt reports the state the fault happened in, not
    /// `RollingBack`.
    async fn roll_back(&mut self, unwind: Unwind) -> RotationResult<()> {
        if let Unwind::Fail(fault) = &unwind {
            self.attempt.last_error = Some(fault.cause.clone());
        }
        self.stop_cancellation();
        self.advance(RotationState::RollingBack)?;

        let Some(backup_id) = self.attempt.pre_backup else {
            tracing::warn!("No pre-update backup; the account had no managed key to restore");
            return self.conclude(unwind);
        };

        match self.reinstate(backup_id).await {
            Ok(()) => {
                tracing::info!(backup_id = %backup_id, "Rolled back to pre-update key");
                self.conclude(unwind)
            }
            Err(e) => {
                let reason = match &unwind {
                    Unwind::Fail(fault) => format!(
                        "restoring backup {backup_id}: {e}; original failure in {}: {}",
                        fault.state, fault.cause
                    ),
                    Unwind::Cancel => format!("restoring backup {backup_id} after cancel: {e}"),
                };
                let fault = self.fault(RotationError::RollbackFailed { reason });
                self.escalate(fault).await
            }
        }
    }

    fn conclude(&mut self, unwind: Unwind) -> RotationResult<()> {
        match unwind {
            Unwind::Fail(fault) => self.fail_with(fault),
            Unwind::Cancel => self.cancelled(),
        }
    }

    /// Restore, push, verify and install a backup without changing state
    async fn reinstate(&mut self, backup_id: BackupId) -> RotationResult<()> {
        let pair = self.inner.backups.restore(backup_id, &self.scope).await?;
        self.push(pair.public_key()).await?;
        self.verify(&pair).await?;
        self.inner.slot.install(&pair).await?;
        self.attempt.restored_backup = Some(backup_id);
        Ok(())
    }
}

/// The rotation orchestrator for one account
///
/// Cheap to clone; clones share components, lease and status.
///
/// # Example
///
/// ```rust,ignore
/// let rotator = Rotator::builder(config)
///     .backups(Arc::new(LocalBackupBackend::new("/var/lib/keyshift/backups")), backup_key)
///     .remote(Arc::new(HttpCredentialUpdater::new(http_config)?))
///     .slot(Arc::new(LocalKeySlot::new("/var/lib/keyshift/active.json", slot_key)))
///     .build()?;
///
/// let attempt = rotator.run_scheduled().await?;
/// assert!(attempt.is_succeeded());
/// ```
#[derive(Clone)]
pub struct Rotator {
    pub(super) inner: Arc<RotatorInner>,
}

impl std::fmt::Debug for Rotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotator")
            .field("account", &self.inner.config.account)
            .finish()
    }
}

impl Rotator {
    /// Start building a rotator
    pub fn builder(config: RotatorConfig) -> RotatorBuilder {
        RotatorBuilder::new(config)
    }

    /// Effective configuration
    pub fn config(&self) -> &RotatorConfig {
        &self.inner.config
    }

    /// Rotated account
    pub fn account(&self) -> &AccountId {
        &self.inner.config.account
    }

    /// Latest snapshot of the running or most recent attempt
    pub fn status(&self) -> Option<RotationAttempt> {
        self.inner.status.borrow().clone()
    }

    /// Wait until every audit entry emitted so far has been delivered
    pub async fn flush_audit(&self) {
        self.inner.audit.flush().await;
    }

    pub(super) async fn run(&self, flow: Flow, plan: Plan) -> RotationResult<RotationAttempt> {
        let attempt = RotationAttempt::new(self.inner.config.account.clone(), flow);
        let lease = self.inner.acquire(attempt.id).await?;
        let (updates, _) = watch::channel(attempt.clone());

        self.inner
            .run_attempt(attempt, lease, plan, CancellationToken::new(), updates)
            .await
    }

    /// Scheduled flow
    ///
    /// `Ok` carries the finished attempt whatever its outcome; `Err` means no
    /// attempt could run (another holds the lease) or the state machine was
    /// misused.
    pub async fn run_scheduled(&self) -> RotationResult<RotationAttempt> {
        let caller = self.inner.scheduler.clone();
        self.run(Flow::Scheduled, Plan::Rotate(caller)).await
    }

    /// Scheduled flow gated on the active key's age
    ///
    /// Inside the warning window an `ExpiryWarning` is audited and nothing
    /// else happens. A missing or overdue key is rotated.
    pub async fn run_scheduled_if_due(&self) -> RotationResult<ScheduleDecision> {
        let current = self.inner.slot.current().await?;
        let status = KeyAgePolicy::from_config(&self.inner.config)
            .evaluate(current.as_ref().map(KeyPair::created_at), Utc::now());

        match status {
            ExpiryStatus::Fresh { due_at } => {
                tracing::debug!(due_at = %due_at, "Key rotation not due");
                Ok(ScheduleDecision::NotDue(status))
            }
            ExpiryStatus::ExpiringSoon {
                key_age_days,
                due_at,
            } => {
                tracing::warn!(key_age_days, due_at = %due_at, "Key approaching rotation date");
                let scope = AuditScope {
                    attempt_id: AttemptId::new(),
                    account: self.inner.config.account.clone(),
                    flow: Flow::Scheduled,
                };
                self.inner.audit.emit(
                    &scope,
                    AuditEvent::ExpiryWarning {
                        key_age_days,
                        due_at,
                    },
                );
                Ok(ScheduleDecision::NotDue(status))
            }
            ExpiryStatus::NoActiveKey | ExpiryStatus::Due { .. } => {
                let attempt = self.run_scheduled().await?;
                Ok(ScheduleDecision::Rotated {
                    status,
                    attempt: Box::new(attempt),
                })
            }
        }
    }

    /// Manual flow, running in the background
    ///
    /// Fails immediately with `RotationInProgress` when another attempt holds
    /// the lease. Transitions are observable through the handle as they occur.
    pub async fn start_manual(&self, request: ManualRequest) -> RotationResult<ManualRotationHandle> {
        let attempt = RotationAttempt::new(self.inner.config.account.clone(), Flow::Manual);
        let lease = self.inner.acquire(attempt.id).await?;

        tracing::info!(
            attempt_id = %attempt.id,
            triggered_by = %request.triggered_by,
            reason = %request.reason,
            "Manual rotation requested"
        );

        let cancel = CancellationToken::new();
        let (updates, receiver) = watch::channel(attempt.clone());
        *self.inner.manual.lock() = Some((attempt.id, cancel.clone()));

        let attempt_id = attempt.id;
        let inner = Arc::clone(&self.inner);
        let plan = Plan::Rotate(request.caller);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            inner
                .run_attempt(attempt, lease, plan, token, updates)
                .await
        });

        Ok(ManualRotationHandle::new(attempt_id, cancel, receiver, task))
    }

    /// Cancel the running manual attempt `attempt_id`
    ///
    /// Returns whether such an attempt was running. Cancellation is honoured
    /// at the next state boundary.
    pub fn cancel(&self, attempt_id: AttemptId) -> bool {
        match self.inner.manual.lock().as_ref() {
            Some((id, token)) if *id == attempt_id => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Builder for [`Rotator`]
///
/// Backups, remote updater and key slot are required. The rest default to
/// an RSA generator of `config.key_bits`, no preconditions, an in-process
/// lease store, and audit to `tracing`.
///
/// The default validator is an empty [`SystemPreconditions`]: it does not
/// check backup storage or the caller's role, so every attempt passes
/// `Validating`. Production rotators should pass their own:
///
/// ```rust,ignore
/// let rotator = Rotator::builder(config)
///     .validator(Arc::new(
///         SystemPreconditions::new()
///             .require_storage("/var/lib/keyshift/backups", 64 * 1024 * 1024)
///             .require_role("accountadmin"),
///     ))
///     // backups, remote, slot ...
///     .build()?;
/// ```
///
/// Processes sharing an account must also share a lease store such as
/// [`LocalLeaseStore`](crate::lease::LocalLeaseStore); the in-process
/// default only excludes rotations within one `Rotator`.
pub struct RotatorBuilder {
    config: RotatorConfig,
    validator: Option<Arc<dyn PreconditionValidator>>,
    generator: Option<Arc<dyn KeyGenerator>>,
    backups: Option<(Arc<dyn BackupBackend>, EncryptionKey)>,
    remote: Option<Arc<dyn CredentialUpdater>>,
    slot: Option<Arc<dyn ActiveKeySlot>>,
    leases: Option<Arc<dyn LeaseStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    scheduler: Caller,
}

impl std::fmt::Debug for RotatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatorBuilder")
            .field("account", &self.config.account)
            .field("has_backups", &self.backups.is_some())
            .field("has_remote", &self.remote.is_some())
            .field("has_slot", &self.slot.is_some())
            .finish()
    }
}

impl RotatorBuilder {
    /// Builder over `config`
    pub fn new(config: RotatorConfig) -> Self {
        Self {
            config,
            validator: None,
            generator: None,
            backups: None,
            remote: None,
            slot: None,
            leases: None,
            audit_sink: None,
            scheduler: Caller::new("scheduler"),
        }
    }

    /// Precondition checks
    pub fn validator(mut self, validator: Arc<dyn PreconditionValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Key generator
    pub fn generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Backup persistence and the key sealing backups
    pub fn backups(mut self, backend: Arc<dyn BackupBackend>, key: EncryptionKey) -> Self {
        self.backups = Some((backend, key));
        self
    }

    /// Remote platform binding
    pub fn remote(mut self, remote: Arc<dyn CredentialUpdater>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Where the live key is installed
    pub fn slot(mut self, slot: Arc<dyn ActiveKeySlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Lease store shared by every process rotating this account
    pub fn leases(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Audit destination
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Identity the Scheduled flow validates as
    pub fn scheduler_caller(mut self, caller: Caller) -> Self {
        self.scheduler = caller;
        self
    }

    /// Validate configuration and assemble the rotator
    ///
    /// Spawns the audit delivery task, so it must run inside a Tokio runtime.
    pub fn build(self) -> RotationResult<Rotator> {
        self.config.validate()?;

        let missing = |field: &str| {
            RotationError::Config(ConfigError::MissingRequired {
                field: field.to_string(),
            })
        };
        let (backend, backup_key) = self.backups.ok_or_else(|| missing("backups"))?;
        let remote = self.remote.ok_or_else(|| missing("remote"))?;
        let slot = self.slot.ok_or_else(|| missing("slot"))?;

        let audit = AuditDispatcher::spawn(
            self.audit_sink
                .unwrap_or_else(|| Arc::new(TracingAuditSink)),
            self.config.audit_timeout,
        );
        let backups = BackupStore::new(
            self.config.account.clone(),
            backend,
            backup_key,
            audit.clone(),
        );
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(RsaKeyGenerator::new(self.config.key_bits)));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SystemPreconditions::new()));
        let leases = self
            .leases
            .unwrap_or_else(|| Arc::new(MemoryLeaseStore::new()));
        let (status, _) = watch::channel(None);

        tracing::debug!(account = %self.config.account, "Rotator ready");

        Ok(Rotator {
            inner: Arc::new(RotatorInner {
                config: self.config,
                validator,
                generator,
                backups,
                remote,
                slot,
                leases,
                audit,
                scheduler: self.scheduler,
                status,
                manual: Mutex::new(None),
            }),
        })
    }
}
