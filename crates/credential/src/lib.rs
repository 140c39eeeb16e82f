//! Keyshift Credential - Service-account key-pair rotation
//!
//! Rotates the asymmetric key pair a service account authenticates with,
//! without ever leaving the account unable to authenticate.
//!
//! # Features
//!
//! - **Scheduled, manual and emergency flows** - One state machine drives all three
//! - **Backup before every change** - Sealed with AES-256-GCM, checksummed, never rewritten
//! - **Verify before commit** - A pushed key is proven to authenticate before it is installed
//! - **Automatic rollback and escalation** - Failures restore the previous key, failed restores escalate
//! - **Single writer per account** - Lease-based mutual exclusion across processes
//! - **Ordered audit trail** - Pluggable sinks, including a chat webhook
#![deny(unsafe_code)]
#![forbid(unsafe_code)]

/// Ordered audit trail and its sinks
pub mod audit;
/// Backup store and backends
pub mod backup;
/// Rotator configuration
pub mod config;
/// Core types, errors, and primitives
pub mod core;
/// Key pair generation
pub mod keygen;
/// Per-account rotation leases
pub mod lease;
/// Precondition checks before a rotation starts
pub mod precondition;
/// Remote platform bindings
pub mod remote;
/// Rotation state machine and flows
pub mod rotation;
/// Where the live key is installed
pub mod slot;
/// Utilities for crypto and files
pub mod utils;

// ── Root re-exports ─────────────────────────────────────────────────────────
// Commonly-used types available directly as `keyshift_credential::TypeName`.

// Core types & errors
pub use crate::core::{
    AccountId, AttemptId, BackupId, CryptoError, KeyPair, PrivateKey, PublicKey, ValidationError,
};

// Configuration
pub use crate::config::{ConfigError, RotatorConfig};

// Utils - crypto
pub use crate::utils::{EncryptedData, EncryptionKey, decrypt, encrypt};

// Rotation
pub use crate::rotation::{
    Flow, RotationAttempt, RotationError, RotationResult, RotationState, Rotator, RotatorBuilder,
};

/// Commonly used types and traits
pub mod prelude {
    // Core types
    pub use crate::core::{AccountId, AttemptId, BackupId, KeyPair, PublicKey};

    // Rotation types
    pub use crate::rotation::{
        EmergencyRequest, Flow, ManualRequest, ManualRotationHandle, RetryPolicy,
        RotationAttempt, RotationError, RotationResult, RotationState, Rotator, ScheduleDecision,
    };

    // Traits
    pub use crate::audit::AuditSink;
    pub use crate::backup::BackupBackend;
    pub use crate::keygen::KeyGenerator;
    pub use crate::lease::LeaseStore;
    pub use crate::precondition::PreconditionValidator;
    pub use crate::remote::CredentialUpdater;
    pub use crate::slot::ActiveKeySlot;

    // Built-in backends
    pub use crate::audit::{MemoryAuditSink, TracingAuditSink, WebhookAuditSink};
    pub use crate::backup::{LocalBackupBackend, MemoryBackupBackend};
    pub use crate::lease::{LocalLeaseStore, MemoryLeaseStore};
    pub use crate::remote::{HttpCredentialUpdater, InMemoryRemoteAccount};
    pub use crate::slot::{LocalKeySlot, MemoryKeySlot};

    // Configuration
    pub use crate::config::RotatorConfig;
    pub use crate::precondition::{Caller, SystemPreconditions};
    pub use crate::utils::EncryptionKey;
}
