//! Shared CLI functionality for SkinLens components
//!
//! Logging options are flattened into every binary's option struct so the
//! flags and environment variables stay identical across components.

use crate::error::{Result, SkinlensError};
use clap::{Args, ValueEnum};
use tracing::Level;

/// Output format for log lines
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-field lines
    #[default]
    Text,
    /// Abbreviated single-line output
    Compact,
    /// Newline-delimited JSON objects
    Json,
}

/// Common logging options shared across all components
#[derive(Args, Debug, Clone)]
pub struct LoggingOptions {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "SKINLENS_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "SKINLENS_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl LoggingOptions {
    /// Install the global tracing subscriber
    ///
    /// Fails if a global subscriber has already been installed.
    pub fn init_logging(&self) -> Result<()> {
        let level = self.parse_log_level();
        let builder = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true);

        let installed = match self.log_format {
            LogFormat::Text => builder
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().with_current_span(false).try_init(),
        };

        installed.map_err(|e| {
            SkinlensError::configuration("Failed to set logging subscriber", Some(e))
        })
    }

    /// Parse the log level string into a tracing Level
    pub fn parse_log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        }
    }
}
