//! Startup loading of every artifact the service needs
//!
//! Loading is all-or-nothing: a missing file, a parse failure or any
//! disagreement between encoder, scaler, labels and weights aborts startup.

use crate::labels::ClassLabels;
use crate::metadata::{FeatureScaler, MetadataEncoder, OneHotEncoder};
use crate::model::{DenseNetConfig, HybridClassifier, HybridConfig};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use skinlens_shared::{Result, SkinlensError};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default encoder file name inside the model directory
pub const DEFAULT_ENCODER_FILE: &str = "encoder.json";
/// Default scaler file name inside the model directory
pub const DEFAULT_SCALER_FILE: &str = "scaler.json";
/// Default label file name inside the model directory
pub const DEFAULT_LABELS_FILE: &str = "label_classes.json";
/// Default weight file name inside the model directory
pub const DEFAULT_WEIGHTS_FILE: &str = "skin_lesion_hybrid_best_weights.safetensors";

/// Locations of the four startup artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Fitted one-hot encoder (JSON)
    pub encoder: PathBuf,
    /// Fitted scaler (JSON)
    pub scaler: PathBuf,
    /// Ordered class labels (JSON array or text)
    pub labels: PathBuf,
    /// Network weights (safetensors or PyTorch state dict)
    pub weights: PathBuf,
}

impl ArtifactPaths {
    /// Default file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            encoder: dir.join(DEFAULT_ENCODER_FILE),
            scaler: dir.join(DEFAULT_SCALER_FILE),
            labels: dir.join(DEFAULT_LABELS_FILE),
            weights: dir.join(DEFAULT_WEIGHTS_FILE),
        }
    }

    /// Fails with the first artifact that does not exist
    pub fn check_exists(&self) -> Result<()> {
        for (name, path) in [
            ("encoder", &self.encoder),
            ("scaler", &self.scaler),
            ("labels", &self.labels),
            ("weights", &self.weights),
        ] {
            if !path.is_file() {
                return Err(SkinlensError::configuration(
                    format!("Missing {} artifact: {}", name, path.display()),
                    None,
                ));
            }
        }
        Ok(())
    }
}

/// Everything loaded at startup, ready to be handed to the service
#[derive(Debug)]
pub struct ModelArtifacts {
    /// Metadata encoder paired with its scaler
    pub metadata: MetadataEncoder,
    /// Ordered class labels
    pub labels: ClassLabels,
    /// Network in inference mode
    pub classifier: HybridClassifier,
}

impl ModelArtifacts {
    /// Loads the artifacts for the DenseNet-121 skin-lesion network
    pub fn load(paths: &ArtifactPaths, device: &Device) -> Result<Self> {
        Self::load_with_backbone(paths, device, DenseNetConfig::densenet121())
    }

    /// Loads the artifacts for a network with a different image backbone
    pub fn load_with_backbone(
        paths: &ArtifactPaths,
        device: &Device,
        backbone: DenseNetConfig,
    ) -> Result<Self> {
        paths.check_exists()?;

        let encoder = OneHotEncoder::from_json_file(&paths.encoder)?;
        let scaler = FeatureScaler::from_json_file(&paths.scaler)?;
        let metadata = MetadataEncoder::new(encoder, scaler, device.clone())?;
        let labels = ClassLabels::from_file(&paths.labels)?;

        info!(
            metadata_features = metadata.output_width(),
            num_classes = labels.len(),
            "Loaded preprocessing artifacts"
        );

        let config = HybridConfig::with_backbone(backbone, metadata.output_width(), labels.len());
        let classifier = HybridClassifier::load(&config, &paths.weights, device)?;

        Ok(Self {
            metadata,
            labels,
            classifier,
        })
    }
}
