//! Logger builder implementation

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{Config, Format, Writer};
use crate::core::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the root span entered for the lifetime of the process
///
/// Dropping the guard exits the root span; the global subscriber itself
/// stays installed.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span: Option<tracing::span::EnteredSpan>,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build and install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {}", self.config.level, e)))?;

        Registry::default()
            .with(fmt_layer(&self.config))
            .with(filter)
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;

        let root = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        Ok(LoggerGuard { _root_span: root })
    }
}

fn make_writer(writer: Writer) -> BoxMakeWriter {
    match writer {
        Writer::Stdout => BoxMakeWriter::new(std::io::stdout),
        Writer::Stderr => BoxMakeWriter::new(std::io::stderr),
        Writer::Test => BoxMakeWriter::new(fmt::TestWriter::new),
    }
}

fn fmt_layer(config: &Config) -> BoxedLayer {
    let display = &config.display;
    let writer = make_writer(config.writer);

    match config.format {
        Format::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(display.colors)
                .with_target(display.target)
                .with_file(display.source)
                .with_line_number(display.source);
            if display.time {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        Format::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(display.colors)
                .with_target(display.target)
                .with_file(display.source)
                .with_line_number(display.source);
            if display.time {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        Format::Json => {
            let layer = fmt::layer()
                .json()
                .flatten_event(display.flatten)
                .with_current_span(true)
                .with_writer(writer)
                .with_target(display.target)
                .with_file(display.source)
                .with_line_number(display.source);
            if display.time {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_rejected_before_install() {
        let config = Config {
            level: "keyshift=notalevel".to_string(),
            ..Config::test()
        };
        let err = LoggerBuilder::from_config(config).build().unwrap_err();
        assert!(matches!(err, LogError::Filter(_)), "got {err:?}");
    }

    #[test]
    fn second_install_reports_already_initialized() {
        // Another test in this binary may have won the race; either way the
        // second call must not panic.
        let _first = LoggerBuilder::from_config(Config::test()).build();
        let second = LoggerBuilder::from_config(Config::test()).build();
        assert!(matches!(second, Err(LogError::AlreadyInitialized)));
    }

    #[test]
    fn every_format_builds_a_layer() {
        for format in [Format::Pretty, Format::Compact, Format::Json] {
            let config = Config {
                format,
                ..Config::test()
            };
            let _layer = fmt_layer(&config);
        }
    }
}
