//! Logger configuration

mod presets;

use serde::{Deserialize, Serialize};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl Format {
    /// Parse a format name, falling back to [`Format::Compact`]
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
    /// Captured by the test harness
    Test,
}

/// What each event line shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// ANSI colors
    pub colors: bool,
    /// Timestamps
    pub time: bool,
    /// Event target (module path)
    pub target: bool,
    /// Source file and line
    pub source: bool,
    /// Flatten event fields into the top-level JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            time: true,
            target: true,
            source: false,
            flatten: false,
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info,keyshift_credential=debug`
    pub level: String,
    /// Output format
    pub format: Format,
    /// Output destination
    pub writer: Writer,
    /// Line contents
    pub display: DisplayConfig,
    /// Service name attached to the root span
    pub service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            writer: Writer::default(),
            display: DisplayConfig::default(),
            service: None,
        }
    }
}
