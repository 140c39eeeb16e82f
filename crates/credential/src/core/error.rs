//! Error types shared by every component

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Decryption failed - invalid key or corrupted data
    #[error("Decryption failed - invalid key or corrupted data")]
    DecryptionFailed,

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Encryption key has the wrong size or encoding
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Unsupported encryption version
    #[error("Unsupported encryption version: {0}")]
    UnsupportedVersion(u8),

    /// Key material could not be encoded or decoded
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    /// Signing with the private key failed
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Account ID cannot be empty
    #[error("Account ID cannot be empty")]
    EmptyAccountId,

    /// Account ID failed validation
    #[error("Invalid account ID '{id}': {reason}")]
    InvalidAccountId { id: String, reason: String },

    /// Backup ID is not of the form `bk-<micros>`
    #[error("Invalid backup ID: {0}")]
    InvalidBackupId(String),
}
