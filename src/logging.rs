//! Structured logging for the AQI animation pipeline.
//!
//! Provides context-rich logging with pipeline stage and sensor identifiers,
//! timestamps, and severity levels. Supports console output and an optional
//! append-only log file for long historical runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::PurpleAirError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(label)
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    PurpleAir,
    Aqi,
    Render,
    Encoder,
    Cache,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::PurpleAir => write!(f, "PURPLEAIR"),
            DataSource::Aqi => write!(f, "AQI"),
            DataSource::Render => write!(f, "RENDER"),
            DataSource::Encoder => write!(f, "ENCODE"),
            DataSource::Cache => write!(f, "CACHE"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - sensor offline or API throttling us
    Expected,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, source: &DataSource, sensor_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let sensor_part = sensor_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry =
            format_entry(&timestamp.to_string(), level, source, sensor_part.as_str(), message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, sensor_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, sensor_part, message),
                LogLevel::Info => println!("  {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}", message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

fn format_entry(
    timestamp: &str,
    level: LogLevel,
    source: &DataSource,
    sensor_part: &str,
    message: &str,
) -> String {
    format!("{} {:<5} {}{}: {}", timestamp, level, source, sensor_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn dispatch(level: LogLevel, source: DataSource, sensor_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, &source, sensor_id, message);
        }
    }
}

/// Log a general informational message
pub fn info(source: DataSource, sensor_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, source, sensor_id, message);
}

/// Log a warning message
pub fn warn(source: DataSource, sensor_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, source, sensor_id, message);
}

/// Log an error message
pub fn error(source: DataSource, sensor_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, source, sensor_id, message);
}

/// Log a debug message
pub fn debug(source: DataSource, sensor_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, source, sensor_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a PurpleAir request failure.
pub fn classify_sensor_failure(err: &PurpleAirError) -> FailureType {
    match err {
        // Throttling and timeouts are the normal cost of a long backfill
        PurpleAirError::RateLimited => FailureType::Expected,
        PurpleAirError::Transport { timeout: true, .. } => FailureType::Expected,
        PurpleAirError::Transport { timeout: false, .. } => FailureType::Unknown,
        PurpleAirError::HttpError(status) if *status >= 500 => FailureType::Unknown,
        // Bad status, bad payload or bad key suggest a bug or an API change
        PurpleAirError::HttpError(_) => FailureType::Unexpected,
        PurpleAirError::ParseError(_) => FailureType::Unexpected,
        PurpleAirError::Auth { .. } => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-sensor failure with automatic classification
pub fn log_sensor_failure(sensor_id: &str, operation: &str, err: &PurpleAirError) {
    let failure_type = classify_sensor_failure(err);

    let message = format!(
        "{} failed [{}]: {}; sensor skipped",
        operation,
        failure_type,
        err
    );

    match failure_type {
        FailureType::Expected | FailureType::Unknown => {
            warn(DataSource::PurpleAir, Some(sensor_id), &message)
        }
        FailureType::Unexpected => error(DataSource::PurpleAir, Some(sensor_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a multi-item stage (sensor fetches, frame renders)
pub fn log_fetch_summary(source: DataSource, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Complete: {}/{} successful, {} failed",
        successful,
        total,
        failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(classify_sensor_failure(&PurpleAirError::RateLimited), FailureType::Expected);
        assert_eq!(
            classify_sensor_failure(&PurpleAirError::Transport {
                message: "operation timed out".into(),
                timeout: true
            }),
            FailureType::Expected
        );
        assert_eq!(classify_sensor_failure(&PurpleAirError::HttpError(503)), FailureType::Unknown);
        assert_eq!(
            classify_sensor_failure(&PurpleAirError::HttpError(400)),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_sensor_failure(&PurpleAirError::ParseError("missing fields".into())),
            FailureType::Unexpected
        );
    }

    #[test]
    fn test_format_entry_includes_sensor_tag() {
        let entry = format_entry(
            "2025-10-29 00:00:00 UTC",
            LogLevel::Warning,
            &DataSource::PurpleAir,
            " [131075]",
            "history fetch failed",
        );
        assert_eq!(
            entry,
            "2025-10-29 00:00:00 UTC WARN  PURPLEAIR [131075]: history fetch failed"
        );
    }
}
