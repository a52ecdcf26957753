//! Backend configuration management
//!
//! A [`BackendConfig`] is built either from command-line options or from a
//! TOML file and is validated before any artifact is touched.
//!
//! ```toml
//! listen_addr = "0.0.0.0:5000"
//! model_dir = "/srv/skinlens/model"
//! device = "cuda:0"
//! confidence_threshold = 0.5
//! max_upload_bytes = 16777216
//! enable_cors = true
//! ```

use crate::service::DEFAULT_CONFIDENCE_THRESHOLD;
use serde::{Deserialize, Serialize};
use skinlens_inference::{ArtifactPaths, DevicePreference};
use skinlens_shared::{Result, SkinlensError};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Default upload limit for a whole multipart body (16 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Smallest upload limit that still fits a tiny image plus the text fields
pub const MIN_UPLOAD_BYTES: usize = 1024;

/// Configuration for the prediction server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct BackendConfig {
    /// Address to bind the HTTP server to
    pub listen_addr: SocketAddr,
    /// Directory holding the model artifacts
    pub model_dir: PathBuf,
    /// Encoder file, overriding `<model_dir>/encoder.json`
    pub encoder_file: Option<PathBuf>,
    /// Scaler file, overriding `<model_dir>/scaler.json`
    pub scaler_file: Option<PathBuf>,
    /// Label file, overriding `<model_dir>/label_classes.json`
    pub labels_file: Option<PathBuf>,
    /// Weight file, overriding the default safetensors file
    pub weights_file: Option<PathBuf>,
    /// Compute device preference
    pub device: DevicePreference,
    /// Minimum top probability for a prediction to be reported as-is
    #[validate(range(
        min = 0.0,
        max = 1.0,
        message = "Confidence threshold must be between 0.0 and 1.0"
    ))]
    pub confidence_threshold: f32,
    /// Upper bound on the size of a `/predict` request body
    #[validate(range(min = 1024, message = "Max upload size must be at least 1024 bytes"))]
    pub max_upload_bytes: usize,
    /// Answer CORS preflights and tag responses with allow-origin headers
    pub enable_cors: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            model_dir: PathBuf::from("model"),
            encoder_file: None,
            scaler_file: None,
            labels_file: None,
            weights_file: None,
            device: DevicePreference::Auto,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_cors: true,
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file
    ///
    /// Keys that are absent take their default value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SkinlensError::configuration(
                format!("Failed to read config file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            SkinlensError::configuration(
                format!("Failed to parse TOML in {}: {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| {
            SkinlensError::configuration(format!("Invalid configuration: {}", e), Some(Box::new(e)))
        })?;

        // NaN slips through range checks
        if !self.confidence_threshold.is_finite() {
            return Err(SkinlensError::configuration(
                "Confidence threshold must be a finite number",
                None,
            ));
        }

        Ok(())
    }

    /// Resolved artifact locations: overrides first, then the model directory
    pub fn artifact_paths(&self) -> ArtifactPaths {
        let defaults = ArtifactPaths::in_dir(&self.model_dir);
        ArtifactPaths {
            encoder: self.encoder_file.clone().unwrap_or(defaults.encoder),
            scaler: self.scaler_file.clone().unwrap_or(defaults.scaler),
            labels: self.labels_file.clone().unwrap_or(defaults.labels),
            weights: self.weights_file.clone().unwrap_or(defaults.weights),
        }
    }
}
