//! Structured logging system using tracing crate
//!
//! The clients emit `tracing` events with structured fields; nothing is
//! printed unless the application installs a subscriber. These helpers install
//! one.
//!
//! ## Log Format Options
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!   (`console` is accepted as an alias)
//!
//! ## File Output
//!
//! With `filename` set in `[logger]`, events go to a rolling file instead of
//! stdout, written by a background thread. The returned [`LoggingGuard`] must
//! be held until exit; dropping it flushes pending lines.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)

use crate::config::{ConfigError, LoggerSection};
use std::env;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" | "console" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name, falling back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_flag(s: &str) -> bool {
    s.to_lowercase() == "true"
}

/// Filter for `level`, quieting the runtime; `RUST_LOG` replaces it entirely
pub fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }
    // Reduce noise from dependencies
    EnvFilter::new(format!("{level},tokio=warn,runtime=warn"))
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Result of installing the global subscriber
///
/// Holds the file writer's worker when logging to a file.
#[must_use = "dropping the guard stops the file writer"]
pub struct LoggingGuard {
    installed: bool,
    worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether this call installed the global subscriber
    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn writes_to_file(&self) -> bool {
        self.worker.is_some()
    }
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("installed", &self.installed)
            .field("writes_to_file", &self.writes_to_file())
            .finish()
    }
}

/// Initialize logging to stdout with manual configuration
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    init_with_writer(level, format, include_spans, BoxMakeWriter::new(std::io::stdout), true)
}

fn init_with_writer(
    level: Level,
    format: LogFormat,
    include_spans: bool,
    writer: BoxMakeWriter,
    ansi: bool,
) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };
    result.is_ok()
}

/// Parse a rotation period name
pub fn parse_rotation(s: &str) -> Result<Rotation, ConfigError> {
    match s.to_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        other => Err(ConfigError::InvalidConfig(format!(
            "unknown log rotation '{other}', expected minutely, hourly, daily or never"
        ))),
    }
}

/// Rolling appender for `filename`
///
/// The directory part of `filename` holds the files and the file name is their
/// prefix. Rotated files carry a date suffix unless rotation is `never`.
pub fn file_appender(
    filename: &str,
    rotation: Rotation,
    max_backups: Option<usize>,
) -> Result<RollingFileAppender, ConfigError> {
    let path = Path::new(filename);
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ConfigError::InvalidConfig(format!("invalid log filename '{filename}'")))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix);
    if let Some(max) = max_backups {
        builder = builder.max_log_files(max);
    }
    builder.build(directory).map_err(|e| {
        ConfigError::InvalidConfig(format!("cannot open log file '{filename}': {e}"))
    })
}

/// Initialize logging from the `[logger]` config section
///
/// Fails on an unknown rotation or an unwritable log directory.
pub fn init_from_config(section: &LoggerSection) -> Result<LoggingGuard, ConfigError> {
    let level = parse_level(&section.level);
    let format = LogFormat::parse(&section.format);

    let Some(filename) = section.filename.as_deref() else {
        return Ok(LoggingGuard {
            installed: init_logging(level, format, section.spans),
            worker: None,
        });
    };

    let appender = file_appender(filename, parse_rotation(&section.rotation)?, section.max_backups)?;
    let (writer, worker) = tracing_appender::non_blocking(appender);
    let installed = init_with_writer(
        level,
        format,
        section.spans,
        BoxMakeWriter::new(writer),
        false,
    );
    Ok(LoggingGuard {
        installed,
        worker: Some(worker),
    })
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> bool {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = parse_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans)
}

/// Create a span covering one connected session
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("client_session", $($field)*)
    };
}

/// Create a span covering one unary call
#[macro_export]
macro_rules! call_span {
    ($($field:tt)*) => {
        tracing::info_span!("unary_call", $($field)*)
    };
}

// Re-export macros for convenience
pub use {call_span, session_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("console"), LogFormat::Compact);
    }

    #[test]
    fn test_rotation_parsing() {
        assert_eq!(parse_rotation("daily").unwrap(), Rotation::DAILY);
        assert_eq!(parse_rotation("Hourly").unwrap(), Rotation::HOURLY);
        assert_eq!(parse_rotation("never").unwrap(), Rotation::NEVER);
        assert!(matches!(
            parse_rotation("weekly"),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_file_appender_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("logs/nested/client.log");
        assert!(file_appender(filename.to_str().unwrap(), Rotation::NEVER, Some(3)).is_ok());
        assert!(dir.path().join("logs/nested").is_dir());
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
    }

    #[test]
    fn test_level_parsing() {
        let test_cases = vec![
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            ("trace", Level::TRACE),
            ("invalid", Level::INFO),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_span_flag_parsing() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("1"));
    }

    #[test]
    fn test_span_macros_build_spans() {
        let session = session_span!(protocol = "mqtt", attempt = 1u32);
        let call = call_span!(message_id = 7u64);
        let _ = (session, call);
    }
}
