use anyhow::{Context, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::LoggingConfig;

const LOG_FILE_NAME: &str = "deepthink.log";

/// Logger implementation using tracing
///
/// Console output goes to stderr so that `--json` command output on stdout
/// stays machine-readable.
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Initialize the global subscriber.
    ///
    /// The returned value owns the file writer's worker guard; keep it alive
    /// for the life of the process or buffered file logs are lost.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let console_layer = match config.format.as_str() {
            "json" => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter.clone())
                .boxed(),
            _ => tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(env_filter.clone())
                .boxed(),
        };

        let (file_layer, guard) = match config.log_dir {
            Some(ref log_dir) => {
                let appender = match config.rotation.as_str() {
                    "hourly" => rolling::hourly(log_dir, LOG_FILE_NAME),
                    "never" => rolling::never(log_dir, LOG_FILE_NAME),
                    _ => rolling::daily(log_dir, LOG_FILE_NAME),
                };
                let (writer, guard) = tracing_appender::non_blocking(appender);

                // File output is always JSON for structured ingestion
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(env_filter)
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .context("Failed to install global tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_invalid_level_fails_before_installing() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(LoggerImpl::init(&config).is_err());
    }

    // Only one global subscriber can be installed per process, so a single
    // test covers the success path and the second-install error.
    #[test]
    fn test_logger_init_with_file_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
            log_dir: Some(dir.path().display().to_string()),
            rotation: "never".to_string(),
        };

        let first = LoggerImpl::init(&config);
        assert!(first.is_ok());
        assert!(LoggerImpl::init(&config).is_err());
    }
}
