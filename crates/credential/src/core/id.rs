//! Identifiers for accounts, rotation attempts and backups
//!
//! [`AccountId`] is validated so it can be embedded in file names and remote
//! API paths without escaping. [`BackupId`] is timestamp-derived and totally
//! ordered, which is what makes "most recent first" well defined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::ValidationError;

/// Maximum length for account IDs
const MAX_ID_LENGTH: usize = 255;

/// Service account whose key pair is rotated (validated)
///
/// Only allows alphanumeric characters, hyphens, underscores and dots.
///
/// # Examples
///
/// ```
/// use keyshift_credential::AccountId;
///
/// let id = AccountId::new("TEAMS_BOT_USER").unwrap();
/// assert_eq!(id.as_str(), "TEAMS_BOT_USER");
///
/// assert!(AccountId::new("").is_err());
/// assert!(AccountId::new("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Creates a new validated account ID
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::EmptyAccountId);
        }

        if id.len() > MAX_ID_LENGTH {
            return Err(ValidationError::InvalidAccountId {
                id,
                reason: format!("exceeds maximum length of {MAX_ID_LENGTH} characters"),
            });
        }

        if id.starts_with('.') {
            return Err(ValidationError::InvalidAccountId {
                id,
                reason: "must not start with '.'".to_string(),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ValidationError::InvalidAccountId {
                id,
                reason: "contains invalid characters (only alphanumeric, '-', '_', '.' allowed)"
                    .to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Returns account ID as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl FromStr for AccountId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for a rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Generate a new attempt ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AttemptId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Backup identifier derived from the creation timestamp
///
/// Wraps microseconds since the Unix epoch. Ids handed out by a
/// [`BackupStore`](crate::backup::BackupStore) are strictly increasing, so
/// ordering ids orders backups by recency.
///
/// ```
/// use keyshift_credential::BackupId;
///
/// let id: BackupId = "bk-1760000000000000".parse().unwrap();
/// assert_eq!(id.as_micros(), 1_760_000_000_000_000);
/// assert_eq!(id.to_string(), "bk-1760000000000000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(u64);

impl BackupId {
    const PREFIX: &'static str = "bk-";

    /// Id for the given instant
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(u64::try_from(at.timestamp_micros()).unwrap_or(0))
    }

    /// Id from raw microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the Unix epoch
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Smallest id strictly greater than `self`
    pub const fn successor(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The instant encoded in this id
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_micros)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for BackupId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidBackupId(s.to_string()))
    }
}

impl TryFrom<String> for BackupId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_accepts_platform_user_names() {
        for valid in ["TEAMS_BOT_USER", "svc-bot", "org.account.user", "a1"] {
            assert!(AccountId::new(valid).is_ok(), "{valid} should be valid");
        }
    }

    #[test]
    fn account_id_rejects_unsafe_names() {
        for invalid in ["", "with space", "a/b", "..", ".hidden", "semi;colon"] {
            assert!(AccountId::new(invalid).is_err(), "{invalid} should be invalid");
        }
        assert!(AccountId::new("x".repeat(256)).is_err());
    }

    #[test]
    fn account_id_serde_validates() {
        let err = serde_json::from_str::<AccountId>("\"bad id\"");
        assert!(err.is_err());
        let ok: AccountId = serde_json::from_str("\"svc\"").unwrap();
        assert_eq!(ok.as_str(), "svc");
    }

    #[test]
    fn backup_id_orders_by_time() {
        let earlier = BackupId::from_micros(10);
        let later = earlier.successor();
        assert!(later > earlier);
        assert_eq!(later.as_micros(), 11);
    }

    #[test]
    fn backup_id_string_form() {
        let now = Utc::now();
        let id = BackupId::from_timestamp(now);
        let parsed: BackupId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(
            id.timestamp().unwrap().timestamp_micros(),
            now.timestamp_micros()
        );

        assert!("17600".parse::<BackupId>().is_err());
        assert!("bk-abc".parse::<BackupId>().is_err());
    }
}
