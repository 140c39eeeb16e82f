//! Utility modules

pub mod crypto;
pub mod fs;

// Re-export commonly used types and functions
pub use crypto::{EncryptedData, EncryptionKey, decrypt, encrypt};
pub use fs::{atomic_write, ensure_private_dir, write_new};
