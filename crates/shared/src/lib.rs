//! # SkinLens Shared Library
//!
//! Shared utilities used by the SkinLens inference and backend crates.
//!
//! ## Features
//!
//! - **Error Handling**: One error taxonomy with HTTP status mapping
//! - **Logging**: Common `tracing` setup flattened into every CLI
//! - **Metrics Collection**: Lock-free request counters

pub mod cli;
pub mod error;
pub mod metrics;

pub use cli::{LogFormat, LoggingOptions};
pub use error::{Result, SkinlensError};
pub use metrics::{MetricsCollector, MetricsSnapshot};
