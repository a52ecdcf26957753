//! CLI options for the SkinLens backend
//!
//! Every option has a `SKINLENS_*` environment fallback. `--config` loads
//! a TOML file instead, in which case the remaining server options are
//! ignored.

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::server::PredictionServer;
use crate::service::{PredictionService, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::BackendConfig;
use clap::{ArgAction, Parser};
use skinlens_inference::{select_device, DevicePreference, ModelArtifacts};
use skinlens_shared::{LoggingOptions, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// SkinLens Backend - skin-lesion prediction server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct BackendCliOptions {
    /// TOML configuration file (overrides the server options below)
    #[arg(short, long, env = "SKINLENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(
        short,
        long,
        default_value = "0.0.0.0:5000",
        env = "SKINLENS_LISTEN_ADDR"
    )]
    pub listen_addr: SocketAddr,

    /// Directory holding encoder, scaler, labels and weights
    #[arg(short, long, default_value = "model", env = "SKINLENS_MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Encoder file (default: <model-dir>/encoder.json)
    #[arg(long, env = "SKINLENS_ENCODER_FILE")]
    pub encoder_file: Option<PathBuf>,

    /// Scaler file (default: <model-dir>/scaler.json)
    #[arg(long, env = "SKINLENS_SCALER_FILE")]
    pub scaler_file: Option<PathBuf>,

    /// Label file (default: <model-dir>/label_classes.json)
    #[arg(long, env = "SKINLENS_LABELS_FILE")]
    pub labels_file: Option<PathBuf>,

    /// Weight file, safetensors or PyTorch state dict
    #[arg(long, env = "SKINLENS_WEIGHTS_FILE")]
    pub weights_file: Option<PathBuf>,

    /// Compute device (auto, cpu, cuda, cuda:N, metal, metal:N)
    #[arg(long, default_value = "auto", env = "SKINLENS_DEVICE")]
    pub device: DevicePreference,

    /// Top probability below which the prediction is reported as uncertain
    #[arg(
        long,
        default_value_t = DEFAULT_CONFIDENCE_THRESHOLD,
        env = "SKINLENS_CONFIDENCE_THRESHOLD"
    )]
    pub confidence_threshold: f32,

    /// Maximum size of a /predict request body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "SKINLENS_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// Emit CORS headers for browser clients
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "SKINLENS_ENABLE_CORS")]
    pub enable_cors: bool,

    #[command(flatten)]
    pub logging: LoggingOptions,
}

impl BackendCliOptions {
    /// Load artifacts and serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let config = self.to_config()?;
        let paths = config.artifact_paths();

        info!(
            listen_addr = %config.listen_addr,
            device = %config.device,
            encoder = %paths.encoder.display(),
            scaler = %paths.scaler.display(),
            labels = %paths.labels.display(),
            weights = %paths.weights.display(),
            "Backend server starting"
        );

        let device = select_device(config.device);
        let artifacts = ModelArtifacts::load(&paths, &device)?;
        let service = PredictionService::from_artifacts(
            artifacts,
            device,
            config.confidence_threshold,
        )?;

        let server = PredictionServer::new(Arc::new(service), &config);
        server.serve(shutdown_signal()).await
    }

    /// Convert CLI options to a validated BackendConfig
    pub fn to_config(&self) -> Result<BackendConfig> {
        if let Some(path) = &self.config {
            info!(config = %path.display(), "Loading configuration file");
            return BackendConfig::from_file(path);
        }

        let config = BackendConfig {
            listen_addr: self.listen_addr,
            model_dir: self.model_dir.clone(),
            encoder_file: self.encoder_file.clone(),
            scaler_file: self.scaler_file.clone(),
            labels_file: self.labels_file.clone(),
            weights_file: self.weights_file.clone(),
            device: self.device,
            confidence_threshold: self.confidence_threshold,
            max_upload_bytes: self.max_upload_bytes,
            enable_cors: self.enable_cors,
        };
        config.validate()?;
        Ok(config)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping backend server");
}
