//! Rotator configuration
//!
//! Loaded from JSON or from `KEYSHIFT_*` environment variables. Durations use
//! humantime notation (`30s`, `15m`, `90days`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::AccountId;
use crate::rotation::RetryPolicy;

/// Smallest RSA modulus accepted for a production configuration
pub const MIN_KEY_BITS: usize = 2048;

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    /// Configuration document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Settings for one rotated account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatorConfig {
    /// Service account whose key pair is rotated
    pub account: AccountId,

    /// RSA modulus size for new keys
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,

    /// Key generation retry budget and backoff
    #[serde(default)]
    pub generation_retry: RetryPolicy,

    /// Bound on every remote push and verify call
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub remote_timeout: Duration,

    /// How long a rotation lease stays valid without being released
    #[serde(default = "default_lease_ttl", with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// Key age after which a scheduled rotation is due
    #[serde(default = "default_rotation_interval", with = "humantime_serde")]
    pub rotation_interval: Duration,

    /// Window before the due date in which expiry warnings are emitted
    #[serde(default = "default_expiry_warning", with = "humantime_serde")]
    pub expiry_warning: Duration,

    /// Push emergency keys automatically instead of waiting for an operator
    #[serde(default)]
    pub emergency_auto_push: bool,

    /// Per-entry delivery bound for the audit sink
    #[serde(default = "default_audit_timeout", with = "humantime_serde")]
    pub audit_timeout: Duration,
}

fn default_key_bits() -> usize {
    MIN_KEY_BITS
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_rotation_interval() -> Duration {
    Duration::from_secs(90 * 24 * 60 * 60)
}

fn default_expiry_warning() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_audit_timeout() -> Duration {
    Duration::from_secs(5)
}

impl RotatorConfig {
    /// Defaults for `account`
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            key_bits: default_key_bits(),
            generation_retry: RetryPolicy::default(),
            remote_timeout: default_remote_timeout(),
            lease_ttl: default_lease_ttl(),
            rotation_interval: default_rotation_interval(),
            expiry_warning: default_expiry_warning(),
            emergency_auto_push: false,
            audit_timeout: default_audit_timeout(),
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup
    ///
    /// Reads `KEYSHIFT_ACCOUNT` (required), `KEYSHIFT_KEY_BITS`,
    /// `KEYSHIFT_REMOTE_TIMEOUT`, `KEYSHIFT_LEASE_TTL`,
    /// `KEYSHIFT_ROTATION_INTERVAL`, `KEYSHIFT_EXPIRY_WARNING`,
    /// `KEYSHIFT_GENERATION_ATTEMPTS` and `KEYSHIFT_EMERGENCY_AUTO_PUSH`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let account = lookup("KEYSHIFT_ACCOUNT").ok_or_else(|| ConfigError::MissingRequired {
            field: "KEYSHIFT_ACCOUNT".into(),
        })?;
        let account = AccountId::new(account).map_err(|e| ConfigError::InvalidValue {
            field: "KEYSHIFT_ACCOUNT".into(),
            reason: e.to_string(),
        })?;

        let mut config = Self::new(account);

        if let Some(bits) = lookup("KEYSHIFT_KEY_BITS") {
            config.key_bits = parse_number("KEYSHIFT_KEY_BITS", &bits)?;
        }
        if let Some(attempts) = lookup("KEYSHIFT_GENERATION_ATTEMPTS") {
            config.generation_retry.max_attempts =
                parse_number("KEYSHIFT_GENERATION_ATTEMPTS", &attempts)?;
        }
        if let Some(value) = lookup("KEYSHIFT_REMOTE_TIMEOUT") {
            config.remote_timeout = parse_duration("KEYSHIFT_REMOTE_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("KEYSHIFT_LEASE_TTL") {
            config.lease_ttl = parse_duration("KEYSHIFT_LEASE_TTL", &value)?;
        }
        if let Some(value) = lookup("KEYSHIFT_ROTATION_INTERVAL") {
            config.rotation_interval = parse_duration("KEYSHIFT_ROTATION_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("KEYSHIFT_EXPIRY_WARNING") {
            config.expiry_warning = parse_duration("KEYSHIFT_EXPIRY_WARNING", &value)?;
        }
        if let Some(value) = lookup("KEYSHIFT_EMERGENCY_AUTO_PUSH") {
            config.emergency_auto_push = parse_bool("KEYSHIFT_EMERGENCY_AUTO_PUSH", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_bits < MIN_KEY_BITS {
            return Err(ConfigError::InvalidValue {
                field: "key_bits".into(),
                reason: format!("must be at least {MIN_KEY_BITS}, got {}", self.key_bits),
            });
        }

        if self.key_bits % 8 != 0 {
            return Err(ConfigError::InvalidValue {
                field: "key_bits".into(),
                reason: "must be a multiple of 8".into(),
            });
        }

        self.generation_retry.validate()?;

        for (field, value) in [
            ("remote_timeout", self.remote_timeout),
            ("lease_ttl", self.lease_ttl),
            ("rotation_interval", self.rotation_interval),
            ("audit_timeout", self.audit_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.lease_ttl <= self.remote_timeout {
            return Err(ConfigError::InvalidValue {
                field: "lease_ttl".into(),
                reason: "must outlast a remote call".into(),
            });
        }

        if self.expiry_warning >= self.rotation_interval {
            return Err(ConfigError::InvalidValue {
                field: "expiry_warning".into(),
                reason: "must be shorter than rotation_interval".into(),
            });
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.into(),
            reason: e.to_string(),
        })
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: e.to_string(),
        }
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.into(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn account() -> AccountId {
        AccountId::new("TEAMS_BOT_USER").unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RotatorConfig::new(account());
        assert_eq!(config.key_bits, 2048);
        assert_eq!(config.generation_retry.max_attempts, 3);
        assert_eq!(config.remote_timeout, Duration::from_secs(30));
        assert!(!config.emergency_auto_push);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_fills_defaults() {
        let config = RotatorConfig::from_json(
            r#"{"account":"TEAMS_BOT_USER","remote_timeout":"10s","rotation_interval":"30days"}"#,
        )
        .unwrap();

        let expected = RotatorConfig {
            remote_timeout: Duration::from_secs(10),
            rotation_interval: Duration::from_secs(30 * 24 * 60 * 60),
            ..RotatorConfig::new(account())
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn json_rejects_invalid_account() {
        let err = RotatorConfig::from_json(r#"{"account":"bad id"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_requires_account() {
        let err = RotatorConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "KEYSHIFT_ACCOUNT".into()
            }
        );
    }

    #[test]
    fn env_overrides() {
        let config = RotatorConfig::from_lookup(lookup(&[
            ("KEYSHIFT_ACCOUNT", "svc-bot"),
            ("KEYSHIFT_KEY_BITS", "4096"),
            ("KEYSHIFT_REMOTE_TIMEOUT", "5s"),
            ("KEYSHIFT_LEASE_TTL", "20m"),
            ("KEYSHIFT_GENERATION_ATTEMPTS", "5"),
            ("KEYSHIFT_EMERGENCY_AUTO_PUSH", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.account.as_str(), "svc-bot");
        assert_eq!(config.key_bits, 4096);
        assert_eq!(config.remote_timeout, Duration::from_secs(5));
        assert_eq!(config.lease_ttl, Duration::from_secs(20 * 60));
        assert_eq!(config.generation_retry.max_attempts, 5);
        assert!(config.emergency_auto_push);
    }

    #[test]
    fn env_reports_bad_values() {
        let err = RotatorConfig::from_lookup(lookup(&[
            ("KEYSHIFT_ACCOUNT", "svc"),
            ("KEYSHIFT_REMOTE_TIMEOUT", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "KEYSHIFT_REMOTE_TIMEOUT"));

        let err = RotatorConfig::from_lookup(lookup(&[
            ("KEYSHIFT_ACCOUNT", "svc"),
            ("KEYSHIFT_EMERGENCY_AUTO_PUSH", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validate_catches_inconsistent_settings() {
        let weak = RotatorConfig {
            key_bits: 1024,
            ..RotatorConfig::new(account())
        };
        assert!(weak.validate().is_err());

        let short_lease = RotatorConfig {
            lease_ttl: Duration::from_secs(10),
            ..RotatorConfig::new(account())
        };
        assert!(short_lease.validate().is_err());

        let late_warning = RotatorConfig {
            expiry_warning: Duration::from_secs(100 * 24 * 60 * 60),
            ..RotatorConfig::new(account())
        };
        assert!(late_warning.validate().is_err());

        let no_attempts = RotatorConfig {
            generation_retry: RetryPolicy::immediate(0),
            ..RotatorConfig::new(account())
        };
        assert!(no_attempts.validate().is_err());
    }
}
