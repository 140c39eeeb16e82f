//! keyshift-log - logging bootstrap
//!
//! Installs a global `tracing` subscriber for processes that embed the
//! rotation core (operator tools, schedulers, test harnesses).
//!
//! ```rust,no_run
//! use keyshift_log::{Config, LoggerBuilder};
//!
//! let _guard = LoggerBuilder::from_config(Config::from_env())
//!     .build()
//!     .expect("logger");
//! tracing::info!("ready");
//! ```
#![forbid(unsafe_code)]

mod builder;
mod config;
mod core;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, Writer};
pub use core::{LogError, LogResult};

/// Initialize logging from environment variables.
///
/// Shorthand for `LoggerBuilder::from_config(Config::from_env()).build()`.
pub fn init() -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(Config::from_env()).build()
}
