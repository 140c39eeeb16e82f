//! Rotation Due Policy
//!
//! Decides from the active key's age whether a scheduled run should rotate,
//! warn, or do nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::attempt::RotationAttempt;
use crate::config::RotatorConfig;

/// Key age thresholds
///
/// # Example
///
/// ```
/// use keyshift_credential::rotation::{ExpiryStatus, KeyAgePolicy};
/// use chrono::{Duration as Days, Utc};
/// use std::time::Duration;
///
/// let policy = KeyAgePolicy::new(
///     Duration::from_secs(90 * 24 * 3600), // rotate every 90 days
///     Duration::from_secs(7 * 24 * 3600),  // warn a week ahead
/// );
///
/// let now = Utc::now();
/// let status = policy.evaluate(Some(now - Days::days(85)), now);
/// assert!(matches!(status, ExpiryStatus::ExpiringSoon { key_age_days: 85, .. }));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAgePolicy {
    /// Age at which a key is due for rotation
    #[serde(with = "humantime_serde")]
    pub rotation_interval: Duration,

    /// How long before the due date to start warning
    #[serde(with = "humantime_serde")]
    pub expiry_warning: Duration,
}

impl KeyAgePolicy {
    /// Policy with explicit thresholds
    pub fn new(rotation_interval: Duration, expiry_warning: Duration) -> Self {
        Self {
            rotation_interval,
            expiry_warning,
        }
    }

    /// Thresholds from rotator configuration
    pub fn from_config(config: &RotatorConfig) -> Self {
        Self::new(config.rotation_interval, config.expiry_warning)
    }

    /// Classify a key created at `created_at` (`None` when no key is active)
    pub fn evaluate(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ExpiryStatus {
        let Some(created_at) = created_at else {
            return ExpiryStatus::NoActiveKey;
        };

        let interval = chrono::Duration::from_std(self.rotation_interval).unwrap_or(chrono::Duration::MAX);
        let warning = chrono::Duration::from_std(self.expiry_warning).unwrap_or(chrono::Duration::MAX);

        let due_at = created_at
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let key_age_days = (now - created_at).num_days();

        if now >= due_at {
            ExpiryStatus::Due {
                key_age_days,
                due_at,
            }
        } else if due_at - now <= warning {
            ExpiryStatus::ExpiringSoon {
                key_age_days,
                due_at,
            }
        } else {
            ExpiryStatus::Fresh { due_at }
        }
    }
}

/// Where the active key stands against its rotation date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExpiryStatus {
    /// Nothing installed yet; the first rotation is always due
    NoActiveKey,

    /// Well within its lifetime
    Fresh { due_at: DateTime<Utc> },

    /// Inside the warning window
    ExpiringSoon {
        key_age_days: i64,
        due_at: DateTime<Utc>,
    },

    /// Past its rotation date
    Due {
        key_age_days: i64,
        due_at: DateTime<Utc>,
    },
}

impl ExpiryStatus {
    /// Whether a scheduled run should rotate now
    pub fn is_due(&self) -> bool {
        matches!(self, Self::NoActiveKey | Self::Due { .. })
    }
}

/// Outcome of a due-check by the scheduler entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// No rotation was needed
    NotDue(ExpiryStatus),

    /// A rotation ran; inspect the attempt for its outcome
    Rotated {
        status: ExpiryStatus,
        attempt: Box<RotationAttempt>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Days;
    use rstest::rstest;

    const DAY: u64 = 24 * 3600;

    fn policy() -> KeyAgePolicy {
        KeyAgePolicy::new(Duration::from_secs(90 * DAY), Duration::from_secs(7 * DAY))
    }

    #[rstest]
    #[case::brand_new(0, false)]
    #[case::before_window(82, false)]
    #[case::in_window(84, false)]
    #[case::exactly_due(90, true)]
    #[case::overdue(400, true)]
    fn due_only_after_interval(#[case] age_days: i64, #[case] due: bool) {
        let now = Utc::now();
        let status = policy().evaluate(Some(now - Days::days(age_days)), now);
        assert_eq!(status.is_due(), due, "{status:?}");
    }

    #[test]
    fn warning_window_reports_age() {
        let now = Utc::now();
        let created = now - Days::days(85);

        assert_eq!(
            policy().evaluate(Some(created), now),
            ExpiryStatus::ExpiringSoon {
                key_age_days: 85,
                due_at: created + Days::days(90),
            }
        );
        assert!(matches!(
            policy().evaluate(Some(now - Days::days(10)), now),
            ExpiryStatus::Fresh { .. }
        ));
    }

    #[test]
    fn missing_key_is_due() {
        let status = policy().evaluate(None, Utc::now());
        assert_eq!(status, ExpiryStatus::NoActiveKey);
        assert!(status.is_due());
    }
}
