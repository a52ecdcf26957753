//! Image decoding and normalisation
//!
//! Produces the `(1, 3, 224, 224)` tensor the DenseNet branch expects:
//! RGB conversion, a direct (aspect-ratio ignoring) bilinear resize, scaling
//! to `[0, 1]`, then per-channel normalisation with the ImageNet statistics
//! the backbone was trained with.

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use skinlens_shared::{Result, SkinlensError};
use tracing::debug;

/// Side length of the square network input
pub const IMAGE_SIZE: u32 = 224;

/// Per-channel mean of the training images (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the training images (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes uploaded image bytes into normalised network input
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    device: Device,
}

impl ImagePreprocessor {
    /// Creates a preprocessor that places its output on `device`
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Decodes `bytes` in any supported format and converts to RGB8
    pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(SkinlensError::validation("cannot identify image file: empty upload"));
        }

        let image = image::load_from_memory(bytes).map_err(|e| {
            SkinlensError::validation(format!("cannot identify image file: {}", e))
        })?;
        Ok(image.to_rgb8())
    }

    /// Resizes and normalises an RGB image into channel-major `f32` values
    pub fn normalize(image: &RgbImage) -> Vec<f32> {
        let resized = image::imageops::resize(image, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);
        let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
        let mut data = vec![0f32; 3 * plane];

        for (index, pixel) in resized.pixels().enumerate() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                data[channel * plane + index] =
                    (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            }
        }
        data
    }

    /// Full pipeline: bytes to a `(1, 3, 224, 224)` tensor on the device
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Tensor> {
        let image = Self::decode(bytes)?;
        debug!(
            width = image.width(),
            height = image.height(),
            "Decoded uploaded image"
        );

        let size = IMAGE_SIZE as usize;
        Tensor::from_vec(Self::normalize(&image), (1, 3, size, size), &self.device)
            .map_err(|e| crate::inference_error("building image tensor", e))
    }
}

/// Lowest and highest value each channel can take after normalisation
pub fn normalized_bounds() -> [(f32, f32); 3] {
    let mut bounds = [(0.0, 0.0); 3];
    for (channel, bound) in bounds.iter_mut().enumerate() {
        *bound = (
            -IMAGENET_MEAN[channel] / IMAGENET_STD[channel],
            (1.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        );
    }
    bounds
}
