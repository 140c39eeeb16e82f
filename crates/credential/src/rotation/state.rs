//! Rotation State Machine
//!
//! One machine serves all three flows. The allowed edges are fixed here;
//! [`RotationAttempt`](super::RotationAttempt) refuses anything else.

use serde::{Deserialize, Serialize};

use super::error::{RotationError, RotationResult};
use crate::backup::BackupLabel;

/// State of a rotation attempt
///
/// # State Transitions
///
/// ```text
/// Idle → Validating → Generating ⇄ RetryingGeneration
///                        ↓
///               BackingUp(pre) → Updating → Verifying → BackingUp(post) → Succeeded
///                                   ↓           ↓              ↓
///                                   → RollingBack ← ← ← ← ← ← ←
///                                          ↓
///                                      Escalating → Restoring → Updating → Verifying
///                                          ↓
///                                      Generating → BackingUp(emergency) → Updating
/// ```
///
/// `Failed` is reachable from every working state that can give up;
/// `Cancelled` only before the remote update has completed, or after a
/// rollback that followed a cancelled push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// Created, nothing done yet
    Idle,

    /// Running precondition checks
    Validating,

    /// Producing a key pair
    Generating,

    /// Waiting out the backoff before another generation attempt
    RetryingGeneration,

    /// Writing a backup
    BackingUp(BackupLabel),

    /// Pushing a public key to the remote platform
    Updating,

    /// Proving a key pair authenticates
    Verifying,

    /// Putting the pre-update key back
    RollingBack,

    /// Automated recovery failed; selecting an emergency remedy
    Escalating,

    /// Unsealing a backup chosen during escalation
    Restoring,

    /// New key verified, backed up and installed
    Succeeded,

    /// Gave up; see the attempt's failure
    Failed,

    /// Stopped on request
    Cancelled,
}

impl RotationState {
    /// Check if transition to the target state is valid
    #[must_use]
    pub fn can_transition_to(&self, target: RotationState) -> bool {
        use BackupLabel::{Emergency, PostUpdate, PreUpdate};
        use RotationState::*;

        match (self, target) {
            (Idle, Validating | Escalating) => true,

            (Validating, Generating | Failed | Cancelled) => true,

            // Straight to Updating when there is no earlier key to back up
            (
                Generating,
                BackingUp(PreUpdate | Emergency) | Updating | RetryingGeneration | Failed
                | Cancelled,
            ) => true,
            (RetryingGeneration, Generating | Cancelled) => true,

            (BackingUp(PreUpdate), Updating | Failed | Cancelled) => true,
            (BackingUp(Emergency), Updating | Failed) => true,
            (BackingUp(PostUpdate), Succeeded | RollingBack) => true,

            (Updating, Verifying | RollingBack | Escalating) => true,
            (
                Verifying,
                BackingUp(PostUpdate) | Succeeded | Failed | RollingBack | Escalating,
            ) => true,

            (RollingBack, Failed | Cancelled | Escalating) => true,
            (Escalating, Restoring | Generating | Failed) => true,
            (Restoring, Updating | Verifying | Escalating | Failed) => true,

            // Terminal states cannot transition
            (Succeeded | Failed | Cancelled, _) => false,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Validate and perform state transition
    pub fn transition_to(&self, target: RotationState) -> RotationResult<RotationState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(RotationError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if state is terminal (no more transitions possible)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RotationState::Succeeded | RotationState::Failed | RotationState::Cancelled
        )
    }
}

impl std::fmt::Display for RotationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationState::Idle => write!(f, "idle"),
            RotationState::Validating => write!(f, "validating"),
            RotationState::Generating => write!(f, "generating"),
            RotationState::RetryingGeneration => write!(f, "retrying_generation"),
            RotationState::BackingUp(label) => write!(f, "backing_up({label})"),
            RotationState::Updating => write!(f, "updating"),
            RotationState::Verifying => write!(f, "verifying"),
            RotationState::RollingBack => write!(f, "rolling_back"),
            RotationState::Escalating => write!(f, "escalating"),
            RotationState::Restoring => write!(f, "restoring"),
            RotationState::Succeeded => write!(f, "succeeded"),
            RotationState::Failed => write!(f, "failed"),
            RotationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RotationState::*;
    use super::*;
    use crate::backup::BackupLabel::{Emergency, PostUpdate, PreUpdate};

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Idle,
            Validating,
            Generating,
            BackingUp(PreUpdate),
            Updating,
            Verifying,
            BackingUp(PostUpdate),
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failure_edges() {
        assert!(Validating.can_transition_to(Failed));
        assert!(Generating.can_transition_to(RetryingGeneration));
        assert!(RetryingGeneration.can_transition_to(Generating));
        assert!(BackingUp(PreUpdate).can_transition_to(Failed));
        assert!(Updating.can_transition_to(RollingBack));
        assert!(Verifying.can_transition_to(RollingBack));
        assert!(BackingUp(PostUpdate).can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(Escalating));
        assert!(Escalating.can_transition_to(Restoring));
        assert!(Escalating.can_transition_to(Generating));
        assert!(Generating.can_transition_to(BackingUp(Emergency)));
    }

    #[test]
    fn test_invalid_transitions() {
        // Never skip the pre-update backup into verification
        assert!(!Generating.can_transition_to(Verifying));
        // No success without verification
        assert!(!Updating.can_transition_to(Succeeded));
        // A pushed key cannot be silently abandoned
        assert!(!Updating.can_transition_to(Cancelled));
        assert!(!Verifying.can_transition_to(Cancelled));
        // Emergency backups are not cancellable
        assert!(!BackingUp(Emergency).can_transition_to(Cancelled));
        // Retrying never gives up on its own
        assert!(!RetryingGeneration.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states() {
        for state in [Succeeded, Failed, Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(Idle));
            assert!(!state.can_transition_to(Validating));
            assert!(!state.can_transition_to(Failed));
        }
        assert!(!Idle.is_terminal());
        assert!(!RollingBack.is_terminal());
    }

    #[test]
    fn test_transition_validation() {
        assert_eq!(Idle.transition_to(Validating).unwrap(), Validating);

        let invalid = Idle.transition_to(Succeeded).unwrap_err();
        assert_eq!(
            invalid,
            RotationError::InvalidStateTransition {
                from: Idle,
                to: Succeeded
            }
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(BackingUp(PreUpdate).to_string(), "backing_up(pre_update)");
        assert_eq!(RetryingGeneration.to_string(), "retrying_generation");
    }
}
