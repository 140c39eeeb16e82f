//! Rotation attempts
//!
//! Tracks one run of the state machine from entry to terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::error::{RotationError, RotationResult};
use super::state::RotationState;
use crate::core::{AccountId, AttemptId, BackupId};

/// Entry point that started an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Periodic run triggered by an external scheduler
    Scheduled,
    /// Operator-started, cancellable
    Manual,
    /// Recovery when normal rotation cannot be trusted
    Emergency,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Scheduled => write!(f, "scheduled"),
            Flow::Manual => write!(f, "manual"),
            Flow::Emergency => write!(f, "emergency"),
        }
    }
}

/// Why an attempt ended `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    /// Attempt that failed
    pub attempt_id: AttemptId,
    /// State the attempt was in when it gave up
    pub state: RotationState,
    /// Root cause
    #[serde(serialize_with = "serialize_display")]
    pub cause: RotationError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {} failed in {}: {}",
            self.attempt_id, self.state, self.cause
        )
    }
}

fn serialize_display<S: Serializer>(value: &RotationError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One rotation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationAttempt {
    /// Unique attempt identifier
    pub id: AttemptId,

    /// Account being rotated
    pub account: AccountId,

    /// Entry point
    pub flow: Flow,

    /// Current state
    pub state: RotationState,

    /// Every state visited, in order, `Idle` first
    pub history: Vec<RotationState>,

    /// When the attempt was created
    pub started_at: DateTime<Utc>,

    /// When it reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Generation attempts that failed
    pub retry_count: u32,

    /// Most recent error seen, recovered from or not
    pub last_error: Option<RotationError>,

    /// Set when the attempt ended `Failed`
    pub failure: Option<AttemptFailure>,

    /// Backup of the key that was active when the attempt started
    pub pre_backup: Option<BackupId>,

    /// Backup of the newly verified key
    pub post_backup: Option<BackupId>,

    /// Backup of a freshly generated emergency key
    pub emergency_backup: Option<BackupId>,

    /// Backup restored during escalation
    pub restored_backup: Option<BackupId>,
}

impl RotationAttempt {
    /// New attempt in `Idle`
    pub fn new(account: AccountId, flow: Flow) -> Self {
        Self {
            id: AttemptId::new(),
            account,
            flow,
            state: RotationState::Idle,
            history: vec![RotationState::Idle],
            started_at: Utc::now(),
            ended_at: None,
            retry_count: 0,
            last_error: None,
            failure: None,
            pre_backup: None,
            post_backup: None,
            emergency_backup: None,
            restored_backup: None,
        }
    }

    /// Move to `target`, returning the state left
    ///
    /// Records `ended_at` when `target` is terminal.
    pub fn transition_to(&mut self, target: RotationState) -> RotationResult<RotationState> {
        let next = self.state.transition_to(target)?;
        let previous = std::mem::replace(&mut self.state, next);
        self.history.push(next);

        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(previous)
    }

    /// Whether the attempt has finished
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the attempt finished `Succeeded`
    pub fn is_succeeded(&self) -> bool {
        self.state == RotationState::Succeeded
    }

    /// Wall time from start to end, if finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    /// Whether the attempt passed through `state`
    pub fn visited(&self, state: RotationState) -> bool {
        self.history.contains(&state)
    }
}
