//! Remote credential updater
//!
//! Two operations against the remote platform: set the account's public key,
//! and prove that a private key authenticates. "Call failed" and "call
//! succeeded but the key does not work" are kept apart: the first is a
//! [`RemoteError`], the second a [`VerifyOutcome::AuthFailed`].

mod http;
mod memory;

pub use http::{HttpCredentialUpdater, HttpUpdaterConfig};
pub use memory::InMemoryRemoteAccount;

use async_trait::async_trait;
use std::time::Duration;

use crate::core::{KeyPair, PublicKey};

/// Remote call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure
    #[error("Remote request failed: {0}")]
    Request(String),

    /// The platform refused the key
    #[error("Remote rejected the public key ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The call did not finish in time; its effect is unknown
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The platform is not reachable or not accepting changes
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

/// Result of an authentication check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The key pair authenticated
    Authenticated,
    /// It did not; the reason is for humans
    AuthFailed(String),
}

impl VerifyOutcome {
    /// Whether authentication succeeded
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Binding to the remote platform's credential API
///
/// `update_public_key` must be idempotent: pushing the key that is already
/// active is a successful no-op. Implementations must not revoke the key
/// being replaced.
#[async_trait]
pub trait CredentialUpdater: Send + Sync {
    /// Make `public_key` the account's active key
    async fn update_public_key(&self, public_key: &PublicKey) -> Result<(), RemoteError>;

    /// Authenticate with `pair` against the platform
    async fn verify_connection(&self, pair: &KeyPair) -> VerifyOutcome;
}

/// Push with a bound; a timeout is an error, never a success
pub async fn push_with_timeout(
    updater: &dyn CredentialUpdater,
    public_key: &PublicKey,
    timeout: Duration,
) -> Result<(), RemoteError> {
    match tokio::time::timeout(timeout, updater.update_public_key(public_key)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(timeout)),
    }
}

/// Verify with a bound; a timeout counts as failed authentication
pub async fn verify_with_timeout(
    updater: &dyn CredentialUpdater,
    pair: &KeyPair,
    timeout: Duration,
) -> VerifyOutcome {
    match tokio::time::timeout(timeout, updater.verify_connection(pair)).await {
        Ok(outcome) => outcome,
        Err(_) => VerifyOutcome::AuthFailed(format!("verification timed out after {timeout:?}")),
    }
}
