//! Logging setup for binaries embedding the resolver.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Global tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| TelemetryError::InvalidFilter {
        filter: level.to_string(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber. Logs go to stderr so resolved documents
/// printed on stdout stay clean.
pub fn init_logging(settings: &LogSettings) -> Result<(), TelemetryError> {
    let filter = build_filter(&settings.level)?;

    let (text_layer, json_layer) = match settings.format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_invalid_level_rejected() {
        std::env::remove_var("RUST_LOG");
        let result = build_filter("groupvars=loud");
        assert!(matches!(result, Err(TelemetryError::InvalidFilter { .. })));
    }

    #[test]
    #[serial]
    fn test_second_init_fails() {
        std::env::remove_var("RUST_LOG");
        let settings = LogSettings {
            level: "debug".to_string(),
            format: LogFormat::Json,
        };

        // Only this test installs a subscriber in the unit test binary.
        assert!(init_logging(&settings).is_ok());
        assert!(matches!(
            init_logging(&settings),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
