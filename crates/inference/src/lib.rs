//! # SkinLens Inference
//!
//! Candle implementation of the skin-lesion classifier and the
//! preprocessing that feeds it.
//!
//! ## Components
//!
//! - **Device selection**: accelerator if available, CPU otherwise
//! - **Metadata encoding**: one-hot + scaler, matching the fitted artifacts
//! - **Image preprocessing**: RGB, 224x224, ImageNet normalisation
//! - **Hybrid classifier**: DenseNet-121 image branch fused with a metadata MLP
//! - **Artifacts**: fail-fast loading of everything above at startup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use skinlens_inference::{select_device, ArtifactPaths, DevicePreference, ModelArtifacts};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = select_device(DevicePreference::Auto);
//!     let artifacts = ModelArtifacts::load(&ArtifactPaths::in_dir("model"), &device)?;
//!     println!("{} classes", artifacts.labels.len());
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod device;
pub mod image_preprocessor;
pub mod labels;
pub mod metadata;
pub mod model;
pub mod traits;

pub mod test_utils;

pub use artifacts::{ArtifactPaths, ModelArtifacts};
pub use device::{describe_device, select_device, DevicePreference};
pub use image_preprocessor::{ImagePreprocessor, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE};
pub use labels::ClassLabels;
pub use metadata::{parse_age, FeatureScaler, MetadataEncoder, MetadataRecord, OneHotEncoder};
pub use model::{DenseNetConfig, HybridClassifier, HybridConfig};
pub use traits::Classifier;

use skinlens_shared::SkinlensError;

/// Wraps a tensor library failure that happened while serving a request
pub(crate) fn inference_error(context: &str, err: candle_core::Error) -> SkinlensError {
    SkinlensError::inference(format!("{}: {}", context, err), Some(Box::new(err)))
}
