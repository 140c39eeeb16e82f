//! Simulated remote account
//!
//! Models a platform user with two public-key slots. Pushing a new key moves
//! the previous primary into the secondary slot, so the old key keeps
//! working until the next push replaces it.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CredentialUpdater, RemoteError, VerifyOutcome};
use crate::core::{KeyPair, PublicKey};

#[derive(Debug, Default)]
struct AccountState {
    primary: Option<PublicKey>,
    secondary: Option<PublicKey>,
    pushes: u32,
}

/// In-process remote account with challenge-response verification
#[derive(Debug, Default)]
pub struct InMemoryRemoteAccount {
    state: RwLock<AccountState>,
}

impl InMemoryRemoteAccount {
    /// Account with no registered keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Account whose primary key is `public_key`
    pub fn with_key(public_key: &PublicKey) -> Self {
        let account = Self::new();
        account.state.write().primary = Some(public_key.clone());
        account
    }

    /// Primary key slot
    pub fn primary(&self) -> Option<PublicKey> {
        self.state.read().primary.clone()
    }

    /// Secondary key slot
    pub fn secondary(&self) -> Option<PublicKey> {
        self.state.read().secondary.clone()
    }

    /// Keys that currently authenticate
    pub fn registered_keys(&self) -> Vec<PublicKey> {
        let state = self.state.read();
        state
            .primary
            .iter()
            .chain(state.secondary.iter())
            .cloned()
            .collect()
    }

    /// Number of pushes that changed state
    pub fn push_count(&self) -> u32 {
        self.state.read().pushes
    }

    /// Remove a key from both slots, as an administrator would
    pub fn revoke(&self, public_key: &PublicKey) {
        let mut state = self.state.write();
        if state.primary.as_ref() == Some(public_key) {
            state.primary = state.secondary.take();
        }
        if state.secondary.as_ref() == Some(public_key) {
            state.secondary = None;
        }
    }

    /// Whether `pair` authenticates right now
    pub fn authenticates(&self, pair: &KeyPair) -> bool {
        let challenge: [u8; 32] = rand::random();
        let Ok(signature) = pair.sign(&challenge) else {
            return false;
        };

        self.registered_keys()
            .iter()
            .any(|key| key.verify(&challenge, &signature))
    }
}

#[async_trait]
impl CredentialUpdater for InMemoryRemoteAccount {
    async fn update_public_key(&self, public_key: &PublicKey) -> Result<(), RemoteError> {
        let mut state = self.state.write();

        if state.primary.as_ref() == Some(public_key) {
            return Ok(());
        }

        let previous = state.primary.replace(public_key.clone());
        // Re-pushing the secondary swaps the slots instead of duplicating it
        state.secondary = previous;
        state.pushes += 1;
        Ok(())
    }

    async fn verify_connection(&self, pair: &KeyPair) -> VerifyOutcome {
        if self.authenticates(pair) {
            VerifyOutcome::Authenticated
        } else {
            VerifyOutcome::AuthFailed(format!(
                "key {} is not registered for the account",
                pair.public_key().fingerprint()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_key_pair;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn push_demotes_previous_key() {
        let old = test_key_pair();
        let new = test_key_pair();
        let account = InMemoryRemoteAccount::with_key(old.public_key());

        account.update_public_key(new.public_key()).await.unwrap();

        assert_eq!(account.primary().as_ref(), Some(new.public_key()));
        assert_eq!(account.secondary().as_ref(), Some(old.public_key()));
        assert!(account.authenticates(&old));
        assert!(account.authenticates(&new));
    }

    #[tokio::test]
    async fn push_is_idempotent() {
        let old = test_key_pair();
        let new = test_key_pair();
        let account = InMemoryRemoteAccount::with_key(old.public_key());

        account.update_public_key(new.public_key()).await.unwrap();
        account.update_public_key(new.public_key()).await.unwrap();

        assert_eq!(account.push_count(), 1);
        assert_eq!(account.registered_keys().len(), 2);
        assert_eq!(account.secondary().as_ref(), Some(old.public_key()));
    }

    #[tokio::test]
    async fn re_pushing_secondary_swaps_slots() {
        let old = test_key_pair();
        let new = test_key_pair();
        let account = InMemoryRemoteAccount::with_key(old.public_key());

        account.update_public_key(new.public_key()).await.unwrap();
        account.update_public_key(old.public_key()).await.unwrap();

        assert_eq!(account.primary().as_ref(), Some(old.public_key()));
        assert_eq!(account.secondary().as_ref(), Some(new.public_key()));
    }

    #[tokio::test]
    async fn unknown_key_fails_verification() {
        let account = InMemoryRemoteAccount::with_key(test_key_pair().public_key());
        let stranger = test_key_pair();

        assert!(matches!(
            account.verify_connection(&stranger).await,
            VerifyOutcome::AuthFailed(_)
        ));
    }

    #[tokio::test]
    async fn revoked_key_stops_authenticating() {
        let pair = test_key_pair();
        let account = InMemoryRemoteAccount::with_key(pair.public_key());
        account.revoke(pair.public_key());
        assert!(!account.authenticates(&pair));
        assert!(account.registered_keys().is_empty());
    }
}
