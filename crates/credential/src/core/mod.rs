//! Core types: identifiers, key material, shared errors

mod error;
mod id;
mod key;

pub use error::{CryptoError, ValidationError};
pub use id::{AccountId, AttemptId, BackupId};
pub use key::{KeyPair, PrivateKey, PublicKey};
