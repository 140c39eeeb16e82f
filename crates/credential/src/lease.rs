//! Rotation lease
//!
//! At most one rotation attempt per account. The lease is an explicit
//! record with a holder and an expiry so a crashed holder does not block the
//! account forever, and so the file-backed store keeps the exclusion across
//! process restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::AccountId;
use crate::utils::{atomic_write, ensure_private_dir, write_new};

/// Error type for lease operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// The lease was taken over or removed by someone else
    #[error("lease for {account} is no longer held by {holder}")]
    Lost { account: AccountId, holder: String },

    /// Storage failure
    #[error("lease backend error: {0}")]
    Backend(String),
}

/// Exclusive, time-bounded claim on an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Claimed account
    pub account: AccountId,
    /// Holder identity (the attempt id)
    pub holder: String,
    /// When the claim was made
    pub acquired_at: DateTime<Utc>,
    /// When the claim lapses
    pub expires_at: DateTime<Utc>,
}

fn expiry(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    from.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Lease {
    fn new(account: &AccountId, holder: &str, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        Self {
            account: account.clone(),
            holder: holder.to_string(),
            acquired_at,
            expires_at: expiry(acquired_at, ttl),
        }
    }

    /// Same claim, lapsing `ttl` from now
    fn extended(&self, ttl: Duration) -> Self {
        Self {
            expires_at: expiry(Utc::now(), ttl),
            ..self.clone()
        }
    }

    fn lost(&self) -> LeaseError {
        LeaseError::Lost {
            account: self.account.clone(),
            holder: self.holder.clone(),
        }
    }

    fn same_record(&self, other: &Self) -> bool {
        self.holder == other.holder && self.expires_at == other.expires_at
    }

    /// Whether the lease has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Lease records
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim `account` for `holder`
    ///
    /// Returns `None` while another holder's lease is live. An expired lease
    /// is taken over.
    async fn try_acquire(
        &self,
        account: &AccountId,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, LeaseError>;

    /// Push the expiry of a held lease `ttl` into the future
    ///
    /// Fails with [`LeaseError::Lost`] once the record belongs to another
    /// holder or has lapsed. A lapsed lease is never revived, since another
    /// process may already be taking it over.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LeaseError>;

    /// Give the lease up
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError>;

    /// Live lease on `account`, if any
    async fn current(&self, account: &AccountId) -> Result<Option<Lease>, LeaseError>;
}

/// Leases held in process memory
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<AccountId, Lease>>,
}

impl MemoryLeaseStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        account: &AccountId,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, LeaseError> {
        let mut leases = self.leases.lock();

        if let Some(existing) = leases.get(account) {
            if existing.holder != holder && !existing.is_expired_at(Utc::now()) {
                return Ok(None);
            }
            if existing.holder != holder {
                tracing::warn!(
                    account = %account,
                    previous_holder = %existing.holder,
                    "Taking over expired rotation lease"
                );
            }
        }

        let lease = Lease::new(account, holder, ttl);
        leases.insert(account.clone(), lease.clone());
        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock();
        match leases.get_mut(&lease.account) {
            Some(existing)
                if existing.holder == lease.holder && !existing.is_expired_at(Utc::now()) =>
            {
                *existing = existing.extended(ttl);
                Ok(existing.clone())
            }
            _ => Err(lease.lost()),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let mut leases = self.leases.lock();
        match leases.get(&lease.account) {
            Some(existing) if existing.holder == lease.holder => {
                leases.remove(&lease.account);
                Ok(())
            }
            _ => Err(lease.lost()),
        }
    }

    async fn current(&self, account: &AccountId) -> Result<Option<Lease>, LeaseError> {
        Ok(self
            .leases
            .lock()
            .get(account)
            .filter(|lease| !lease.is_expired_at(Utc::now()))
            .cloned())
    }
}

/// Lease records as files, one per account
///
/// Creation is exclusive at the filesystem level, so two processes on the
/// same host cannot both acquire a free lease.
#[derive(Debug)]
pub struct LocalLeaseStore {
    root: PathBuf,
    // Serializes read-check-write within this process
    guard: tokio::sync::Mutex<()>,
}

impl LocalLeaseStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    fn path(&self, account: &AccountId) -> PathBuf {
        self.root.join(format!("{account}.lease"))
    }

    async fn read(&self, account: &AccountId) -> Result<Option<Lease>, LeaseError> {
        match tokio::fs::read(self.path(account)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| LeaseError::Backend(format!("unreadable lease record: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LeaseError::Backend(e.to_string())),
        }
    }

    /// Move the record `observed` aside
    ///
    /// `observed` is `None` for a record that did not parse. Another process
    /// may have replaced the file since it was read; if the moved record is
    /// not the observed one it is put back and `false` is returned.
    async fn retire(
        &self,
        account: &AccountId,
        observed: Option<&Lease>,
    ) -> Result<bool, LeaseError> {
        let path = self.path(account);
        let tombstone = path.with_extension(format!("lease.stale.{}", Uuid::new_v4()));

        // Rename first: of two racing takers only one moves the stale record
        match tokio::fs::rename(&path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(LeaseError::Backend(e.to_string())),
        }

        let bytes = tokio::fs::read(&tombstone)
            .await
            .map_err(|e| LeaseError::Backend(e.to_string()))?;
        let moved = serde_json::from_slice::<Lease>(&bytes).ok();
        let unchanged = match (observed, &moved) {
            (Some(observed), Some(moved)) => observed.same_record(moved),
            (None, None) => true,
            _ => false,
        };

        if !unchanged {
            tracing::warn!(
                account = %account,
                holder = moved.as_ref().map_or("unreadable", |l| l.holder.as_str()),
                "Lease record changed while being replaced; putting it back"
            );
            match write_new(&path, &bytes).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(LeaseError::Backend(e.to_string())),
            }
        }

        let _ = tokio::fs::remove_file(&tombstone).await;
        Ok(unchanged)
    }
}

#[async_trait]
impl LeaseStore for LocalLeaseStore {
    async fn try_acquire(
        &self,
        account: &AccountId,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, LeaseError> {
        let _guard = self.guard.lock().await;

        ensure_private_dir(&self.root)
            .await
            .map_err(|e| LeaseError::Backend(e.to_string()))?;

        match self.read(account).await {
            Ok(Some(existing)) => {
                if existing.holder != holder && !existing.is_expired_at(Utc::now()) {
                    return Ok(None);
                }
                tracing::warn!(
                    account = %account,
                    previous_holder = %existing.holder,
                    "Replacing rotation lease record"
                );
                if !self.retire(account, Some(&existing)).await? {
                    return Ok(None);
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A half-written record from a crash; it cannot protect anyone
                tracing::warn!(account = %account, error = %e, "Discarding unreadable lease record");
                if !self.retire(account, None).await? {
                    return Ok(None);
                }
            }
        }

        let lease = Lease::new(account, holder, ttl);
        let json = serde_json::to_vec(&lease).map_err(|e| LeaseError::Backend(e.to_string()))?;

        match write_new(&self.path(account), &json).await {
            Ok(()) => Ok(Some(lease)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(LeaseError::Backend(e.to_string())),
        }
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LeaseError> {
        let _guard = self.guard.lock().await;

        match self.read(&lease.account).await? {
            Some(existing)
                if existing.holder == lease.holder && !existing.is_expired_at(Utc::now()) =>
            {
                let renewed = existing.extended(ttl);
                let json = serde_json::to_vec(&renewed)
                    .map_err(|e| LeaseError::Backend(e.to_string()))?;
                atomic_write(&self.path(&lease.account), &json)
                    .await
                    .map_err(|e| LeaseError::Backend(e.to_string()))?;
                Ok(renewed)
            }
            _ => Err(lease.lost()),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let _guard = self.guard.lock().await;

        match self.read(&lease.account).await? {
            Some(existing) if existing.holder == lease.holder => {
                if self.retire(&lease.account, Some(&existing)).await? {
                    Ok(())
                } else {
                    Err(lease.lost())
                }
            }
            _ => Err(lease.lost()),
        }
    }

    async fn current(&self, account: &AccountId) -> Result<Option<Lease>, LeaseError> {
        Ok(self
            .read(account)
            .await?
            .filter(|lease| !lease.is_expired_at(Utc::now())))
    }
}
