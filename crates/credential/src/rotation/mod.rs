//! Key Rotation
//!
//! Replaces a service account's key pair without ever leaving the account
//! without a key that authenticates.
//!
//! # Flows
//!
//! - **Scheduled**: unattended, gated on key age by [`KeyAgePolicy`]
//!   - [`Rotator::run_scheduled`] always rotates
//!   - [`Rotator::run_scheduled_if_due`] warns inside the expiry window and
//!     rotates once the key is due
//!
//! - **Manual**: operator-initiated, runs in the background
//!   - Status is observable per transition through [`ManualRotationHandle`]
//!   - Cancellable until the remote update completes
//!
//! - **Emergency**: recovery when rollback failed or on operator request
//!   - Newest valid backup first, a fresh emergency key otherwise
//!   - Emergency keys may need a manual push, confirmed with
//!     [`Rotator::confirm_manual_push`]
//!
//! # Safety
//!
//! - The working key is backed up before the remote is touched
//! - A pushed key replaces the installed one only after it authenticated
//! - Any failure after the push restores the backed-up key
//! - A failed restore escalates instead of ending the attempt
//! - One attempt per account at a time, enforced by a [`Lease`](crate::lease::Lease)
//!
//! # Example
//!
//! ```rust,ignore
//! use keyshift_credential::rotation::{ManualRequest, Rotator};
//!
//! let handle = rotator
//!     .start_manual(ManualRequest::new(Caller::new("alice"), "suspected leak"))
//!     .await?;
//!
//! let mut updates = handle.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{}", updates.borrow().state);
//! }
//!
//! let attempt = handle.wait().await?;
//! ```

// Module exports
pub mod attempt;
pub mod emergency;
pub mod error;
pub mod manual;
pub mod operator;
mod orchestrator;
pub mod policy;
pub mod retry;
pub mod state;

// Re-exports
pub use attempt::{AttemptFailure, Flow, RotationAttempt};
pub use emergency::EmergencyRequest;
pub use error::{RotationError, RotationResult};
pub use manual::{ManualRequest, ManualRotationHandle};
pub use operator::{BackupSummary, OperatorCommand, OperatorResponse};
pub use orchestrator::{Rotator, RotatorBuilder};
pub use policy::{ExpiryStatus, KeyAgePolicy, ScheduleDecision};
pub use retry::RetryPolicy;
pub use state::RotationState;
