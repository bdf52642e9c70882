//! Structured logging setup using tracing
//!
//! The pipeline logs through `tracing` macros everywhere; embedding
//! applications either install their own subscriber or call
//! [`init_logging`] once at startup.

use crate::errors::{ExportError, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Output style for the console subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable single-line output
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Initialize a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over `log_level_str` when set.
///
/// # Errors
///
/// Returns an error if the level string is not recognised or a global
/// subscriber has already been installed.
pub fn init_logging(log_level_str: &str, format: LogFormat) -> Result<()> {
    let level = parse_log_level(log_level_str)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("climate_export={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| ExportError::Configuration(format!("Logging already initialized: {}", e)))
}

/// Parse a log level name
///
/// # Errors
///
/// Returns [`ExportError::Configuration`] for unknown level names.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ExportError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            other
        ))),
    }
}
