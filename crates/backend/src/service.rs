//! Prediction service
//!
//! Owns every loaded artifact and turns one [`PredictRequest`] into one
//! [`PredictionResult`]. The service is immutable once built and is shared
//! between request tasks behind an `Arc`; nothing is remembered between
//! calls.

use bytes::Bytes;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use skinlens_inference::{
    describe_device, ClassLabels, Classifier, HybridClassifier, ImagePreprocessor,
    MetadataEncoder, MetadataRecord, ModelArtifacts,
};
use skinlens_shared::{Result, SkinlensError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Label reported when the top probability is below the threshold
pub const UNCERTAIN_LABEL: &str = "no cancer detected";

/// Threshold the network was calibrated against
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// One fully parsed `/predict` submission
#[derive(Debug, Clone)]
pub struct PredictRequest {
    /// Patient metadata
    pub metadata: MetadataRecord,
    /// Raw uploaded image bytes
    pub image: Bytes,
}

/// Response body of a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Winning label, or [`UNCERTAIN_LABEL`]
    pub predicted_class: String,
    /// Probability of every class, keyed by label
    pub class_probabilities: BTreeMap<String, f32>,
    /// Set when the threshold replaced the winning label
    #[serde(skip)]
    pub uncertain: bool,
}

impl PredictionResult {
    /// Whether the threshold replaced the winning label
    pub fn is_uncertain(&self) -> bool {
        self.uncertain
    }
}

/// Stateless request-to-prediction pipeline over loaded artifacts
#[derive(Debug)]
pub struct PredictionService<C = HybridClassifier> {
    metadata: MetadataEncoder,
    images: ImagePreprocessor,
    classifier: C,
    labels: ClassLabels,
    confidence_threshold: f32,
    device_name: String,
}

impl PredictionService<HybridClassifier> {
    /// Builds the service from everything loaded at startup
    pub fn from_artifacts(
        artifacts: ModelArtifacts,
        device: Device,
        confidence_threshold: f32,
    ) -> Result<Self> {
        Self::new(
            artifacts.metadata,
            artifacts.classifier,
            artifacts.labels,
            device,
            confidence_threshold,
        )
    }
}

impl<C: Classifier> PredictionService<C> {
    /// Assembles a service, checking that the network and labels agree
    pub fn new(
        metadata: MetadataEncoder,
        classifier: C,
        labels: ClassLabels,
        device: Device,
        confidence_threshold: f32,
    ) -> Result<Self> {
        if classifier.num_classes() != labels.len() {
            return Err(SkinlensError::model(
                format!(
                    "Classifier produces {} classes but {} labels were loaded",
                    classifier.num_classes(),
                    labels.len()
                ),
                None,
            ));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(SkinlensError::configuration(
                format!(
                    "Confidence threshold {} is outside [0, 1]",
                    confidence_threshold
                ),
                None,
            ));
        }

        let device_name = describe_device(&device);
        info!(
            device = %device_name,
            num_classes = labels.len(),
            metadata_features = metadata.output_width(),
            confidence_threshold,
            "Prediction service ready"
        );

        Ok(Self {
            metadata,
            images: ImagePreprocessor::new(device),
            classifier,
            labels,
            confidence_threshold,
            device_name,
        })
    }

    /// Runs the full pipeline for one request
    pub fn predict(&self, request: &PredictRequest) -> Result<PredictionResult> {
        let metadata = self.metadata.encode(&request.metadata)?;
        let image = self.images.preprocess(&request.image)?;

        let logits = self.classifier.logits(&image, &metadata)?;
        let probabilities = softmax_probabilities(&logits)?;
        if probabilities.len() != self.labels.len() {
            return Err(SkinlensError::inference(
                format!(
                    "Model returned {} scores for {} labels",
                    probabilities.len(),
                    self.labels.len()
                ),
                None,
            ));
        }

        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| SkinlensError::inference("Model returned no scores", None))?;
        let label = self.labels.get(index).ok_or_else(|| {
            SkinlensError::internal(format!("No label for class index {}", index), None)
        })?;
        let (predicted_class, uncertain) = decide(label, confidence, self.confidence_threshold);

        debug!(
            top_label = label,
            confidence,
            predicted_class = %predicted_class,
            uncertain,
            "Prediction complete"
        );

        let class_probabilities = self
            .labels
            .iter()
            .map(str::to_string)
            .zip(probabilities)
            .collect();

        Ok(PredictionResult {
            predicted_class,
            class_probabilities,
            uncertain,
        })
    }

    /// Ordered class labels
    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Threshold below which predictions are reported as uncertain
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Human-readable name of the compute device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

/// Softmax over a `(1, num_classes)` logit tensor
pub fn softmax_probabilities(logits: &Tensor) -> Result<Vec<f32>> {
    let flat = logits
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .map_err(|e| {
            SkinlensError::inference(format!("Invalid logits: {}", e), Some(Box::new(e)))
        })?;

    candle_nn::ops::softmax(&flat, 0)
        .and_then(|p| p.to_vec1::<f32>())
        .map_err(|e| SkinlensError::inference(format!("Softmax failed: {}", e), Some(Box::new(e))))
}

/// Index and value of the largest probability; the first one wins ties
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in probabilities.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((index, value)),
        }
    }
    best
}

/// Applies the confidence threshold to the winning label
///
/// Returns the reported class and whether it was replaced by
/// [`UNCERTAIN_LABEL`]. A confidence exactly equal to the threshold keeps
/// the label.
pub fn decide(label: &str, confidence: f32, threshold: f32) -> (String, bool) {
    if confidence < threshold {
        (UNCERTAIN_LABEL.to_string(), true)
    } else {
        (label.to_string(), false)
    }
}
