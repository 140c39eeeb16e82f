//! Key pair generation
//!
//! Generation runs on a blocking thread: a 2048-bit RSA key takes long
//! enough to stall a runtime worker.

use async_trait::async_trait;
use chrono::Utc;
use rsa::RsaPrivateKey;

use crate::core::{KeyPair, PrivateKey, PublicKey};

/// Key generation errors
///
/// All variants count against the generation retry budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The underlying generator failed
    #[error("Key generation failed: {0}")]
    Failed(String),

    /// The public key is not in the encoding the remote platform expects
    #[error("Generated public key failed format validation")]
    InvalidFormat,

    /// The blocking generation task panicked or was cancelled
    #[error("Key generation task aborted: {0}")]
    Aborted(String),
}

/// Produces fresh key pairs
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a new key pair
    async fn generate(&self) -> Result<KeyPair, GenerationError>;

    /// Whether `public_key` has the encoding the remote platform expects
    fn validate_format(&self, public_key: &str) -> bool;
}

/// RSA key pairs with a fixed modulus size
#[derive(Debug, Clone, Copy)]
pub struct RsaKeyGenerator {
    bits: usize,
}

impl RsaKeyGenerator {
    /// Generator for `bits`-bit keys
    pub const fn new(bits: usize) -> Self {
        Self { bits }
    }

    /// Configured modulus size
    pub const fn bits(&self) -> usize {
        self.bits
    }
}

impl Default for RsaKeyGenerator {
    fn default() -> Self {
        Self::new(crate::config::MIN_KEY_BITS)
    }
}

#[async_trait]
impl KeyGenerator for RsaKeyGenerator {
    async fn generate(&self) -> Result<KeyPair, GenerationError> {
        let bits = self.bits;

        let private_key = tokio::task::spawn_blocking(move || {
            let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, bits)
                .map_err(|e| GenerationError::Failed(e.to_string()))?;
            PrivateKey::from_rsa(&key).map_err(|e| GenerationError::Failed(e.to_string()))
        })
        .await
        .map_err(|e| GenerationError::Aborted(e.to_string()))??;

        let pair = KeyPair::from_private_key(private_key, Utc::now())
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        tracing::debug!(
            bits,
            fingerprint = %pair.public_key().fingerprint(),
            "Generated key pair"
        );

        Ok(pair)
    }

    fn validate_format(&self, public_key: &str) -> bool {
        // Normalized form only: no PEM armour, no line breaks
        if public_key.is_empty() || public_key.contains(['\n', '\r', ' ', '-']) {
            return false;
        }

        PublicKey::parse(public_key)
            .and_then(|key| key.bits())
            .is_ok_and(|bits| bits == self.bits)
    }
}
