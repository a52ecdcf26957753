//! Test Utilities
//!
//! Fixture artifacts shared by the inference and backend test suites. The
//! fixture network uses a reduced DenseNet so a full forward pass stays
//! fast, while the metadata branch and head keep their real shapes.

use crate::artifacts::{
    ArtifactPaths, DEFAULT_ENCODER_FILE, DEFAULT_LABELS_FILE, DEFAULT_SCALER_FILE,
};
use crate::model::{DenseNetConfig, HybridClassifier, HybridConfig};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::json;
use std::io::Cursor;
use std::path::Path;

/// Categories the fixture encoder was "fitted" on
pub const FIXTURE_SEX: [&str; 3] = ["female", "male", "unknown"];
/// Diagnosis types known to the fixture encoder
pub const FIXTURE_DX_TYPE: [&str; 4] = ["confocal", "consensus", "follow_up", "histo"];
/// Localizations known to the fixture encoder
pub const FIXTURE_LOCALIZATION: [&str; 5] = ["abdomen", "back", "face", "lower extremity", "trunk"];
/// Fixture class labels in output order
pub const FIXTURE_LABELS: [&str; 7] = ["akiec", "bcc", "bkl", "df", "mel", "nv", "vasc"];

/// Width of the fixture metadata vector (one-hot columns + age)
pub fn fixture_metadata_width() -> usize {
    FIXTURE_SEX.len() + FIXTURE_DX_TYPE.len() + FIXTURE_LOCALIZATION.len() + 1
}

/// Small DenseNet with the same layer structure as DenseNet-121
pub fn tiny_backbone() -> DenseNetConfig {
    DenseNetConfig {
        growth_rate: 4,
        block_config: vec![2, 2],
        num_init_features: 8,
        bn_size: 2,
    }
}

/// Architecture of the fixture network
pub fn fixture_config() -> HybridConfig {
    HybridConfig::with_backbone(tiny_backbone(), fixture_metadata_width(), FIXTURE_LABELS.len())
}

/// Writes encoder, scaler, labels and randomly initialised weights to `dir`
pub fn write_fixture_artifacts(dir: &Path) -> std::io::Result<ArtifactPaths> {
    let paths = ArtifactPaths::in_dir(dir);
    let width = fixture_metadata_width();

    let encoder = json!({
        "columns": ["sex", "dx_type", "localization"],
        "categories": [FIXTURE_SEX, FIXTURE_DX_TYPE, FIXTURE_LOCALIZATION],
    });
    std::fs::write(dir.join(DEFAULT_ENCODER_FILE), encoder.to_string())?;

    let mut mean = vec![0.3; width];
    let mut scale = vec![0.45; width];
    mean[width - 1] = 51.8;
    scale[width - 1] = 16.9;
    let scaler = json!({ "kind": "standard", "mean": mean, "scale": scale });
    std::fs::write(dir.join(DEFAULT_SCALER_FILE), scaler.to_string())?;

    std::fs::write(
        dir.join(DEFAULT_LABELS_FILE),
        serde_json::to_string(&FIXTURE_LABELS).map_err(std::io::Error::other)?,
    )?;

    write_weights(&fixture_config(), &paths.weights).map_err(std::io::Error::other)?;
    Ok(paths)
}

/// Saves randomly initialised weights for `config` as safetensors
pub fn write_weights(config: &HybridConfig, path: &Path) -> candle_core::Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    HybridClassifier::new(config, vb)?;
    varmap.save(path)
}

/// PNG bytes of a solid RGB image
pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color))),
        ImageFormat::Png,
    )
}

/// PNG bytes of a translucent RGBA gradient
pub fn gradient_rgba_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgba([r, g, 128, 100])
    });
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

/// Encodes an image in the given container format
pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .expect("in-memory image encoding cannot fail");
    buffer.into_inner()
}
