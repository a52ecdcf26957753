//! Prediction Service Tests
//!
//! Drives the service with fixed logits to pin down softmax, argmax and
//! threshold behaviour, and with the fixture network for the full pipeline.

use bytes::Bytes;
use candle_core::{Device, Tensor};
use skinlens_backend::{PredictRequest, PredictionService, UNCERTAIN_LABEL};
use skinlens_inference::test_utils::{
    solid_png, tiny_backbone, write_fixture_artifacts, FIXTURE_LABELS,
};
use skinlens_inference::{
    ClassLabels, Classifier, FeatureScaler, MetadataEncoder, MetadataRecord, ModelArtifacts,
    OneHotEncoder,
};
use skinlens_shared::{Result, SkinlensError};

/// Ignores its inputs and returns the same logits every time
#[derive(Debug)]
struct FixedLogits(Vec<f32>);

impl Classifier for FixedLogits {
    fn num_classes(&self) -> usize {
        self.0.len()
    }

    fn logits(&self, _image: &Tensor, _metadata: &Tensor) -> Result<Tensor> {
        Tensor::from_vec(self.0.clone(), (1, self.0.len()), &Device::Cpu)
            .map_err(|e| SkinlensError::inference(e.to_string(), None))
    }
}

fn fixture_parts() -> (MetadataEncoder, ClassLabels) {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_fixture_artifacts(dir.path()).unwrap();
    let encoder = OneHotEncoder::from_json_file(&paths.encoder).unwrap();
    let scaler = FeatureScaler::from_json_file(&paths.scaler).unwrap();
    let labels = ClassLabels::from_file(&paths.labels).unwrap();
    (
        MetadataEncoder::new(encoder, scaler, Device::Cpu).unwrap(),
        labels,
    )
}

fn service(logits: Vec<f32>, threshold: f32) -> PredictionService<FixedLogits> {
    let (metadata, labels) = fixture_parts();
    PredictionService::new(metadata, FixedLogits(logits), labels, Device::Cpu, threshold).unwrap()
}

fn request(sex: &str) -> PredictRequest {
    PredictRequest {
        metadata: MetadataRecord::new(sex, "histo", "back", 45.0).unwrap(),
        image: Bytes::from(solid_png(64, 48, [190, 110, 80])),
    }
}

#[test]
fn test_confident_prediction_keeps_label() {
    let service = service(vec![0.0, 0.0, 0.0, 0.0, 8.0, 0.0, 0.0], 0.5);
    let result = service.predict(&request("male")).unwrap();

    assert_eq!(result.predicted_class, "mel");
    assert!(!result.is_uncertain());
    assert!(result.class_probabilities["mel"] > 0.99);
}

#[test]
fn test_low_confidence_returns_uncertain_label() {
    let service = service(vec![0.0; 7], 0.5);
    let result = service.predict(&request("female")).unwrap();

    assert_eq!(result.predicted_class, UNCERTAIN_LABEL);
    assert!(result.is_uncertain());
    assert_eq!(result.class_probabilities.len(), FIXTURE_LABELS.len());
    for probability in result.class_probabilities.values() {
        assert!((probability - 1.0 / 7.0).abs() < 1e-5);
    }
}

#[test]
fn test_label_named_like_fallback_is_not_uncertain() {
    let (metadata, _) = fixture_parts();
    let labels = ClassLabels::new(
        ["akiec", "bcc", "bkl", "df", UNCERTAIN_LABEL, "nv", "vasc"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
    .unwrap();
    let classifier = FixedLogits(vec![0.0, 0.0, 0.0, 0.0, 8.0, 0.0, 0.0]);
    let service = PredictionService::new(metadata, classifier, labels, Device::Cpu, 0.5).unwrap();

    let result = service.predict(&request("male")).unwrap();
    assert_eq!(result.predicted_class, UNCERTAIN_LABEL);
    assert!(!result.is_uncertain());
}

#[test]
fn test_zero_threshold_and_ties() {
    let service = service(vec![0.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0], 0.0);
    let result = service.predict(&request("male")).unwrap();
    assert_eq!(result.predicted_class, "bcc");
}

#[test]
fn test_probabilities_form_a_distribution() {
    let service = service(vec![1.5, -2.0, 0.3, 4.0, -0.7, 2.2, 0.0], 0.5);
    let result = service.predict(&request("unknown")).unwrap();

    let labels: Vec<&str> = result.class_probabilities.keys().map(String::as_str).collect();
    assert_eq!(labels, FIXTURE_LABELS.to_vec());
    let total: f32 = result.class_probabilities.values().sum();
    assert!((total - 1.0).abs() < 1e-4);
    assert!(result
        .class_probabilities
        .values()
        .all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_invalid_inputs_are_validation_errors() {
    let service = service(vec![0.0; 7], 0.5);

    let err = service.predict(&request("X")).unwrap_err();
    assert!(matches!(err, SkinlensError::Validation { .. }));
    assert_eq!(err.to_http_status(), 400);

    let mut bad_image = request("male");
    bad_image.image = Bytes::from_static(b"plain text");
    let err = service.predict(&bad_image).unwrap_err();
    assert!(matches!(err, SkinlensError::Validation { .. }));
}

#[test]
fn test_class_count_must_match_labels() {
    let (metadata, labels) = fixture_parts();
    let err = PredictionService::new(metadata, FixedLogits(vec![0.0; 3]), labels, Device::Cpu, 0.5)
        .unwrap_err();
    assert!(matches!(err, SkinlensError::Model { .. }));
}

#[test]
fn test_threshold_must_be_a_probability() {
    let (metadata, labels) = fixture_parts();
    let err = PredictionService::new(metadata, FixedLogits(vec![0.0; 7]), labels, Device::Cpu, 1.2)
        .unwrap_err();
    assert!(matches!(err, SkinlensError::Configuration { .. }));
}

#[test]
fn test_fixture_network_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_fixture_artifacts(dir.path()).unwrap();
    let artifacts =
        ModelArtifacts::load_with_backbone(&paths, &Device::Cpu, tiny_backbone()).unwrap();
    let service = PredictionService::from_artifacts(artifacts, Device::Cpu, 0.5).unwrap();

    let first = service.predict(&request("male")).unwrap();
    let second = service.predict(&request("male")).unwrap();
    assert_eq!(first, second);
    assert_eq!(service.labels().len(), FIXTURE_LABELS.len());
    assert_eq!(service.device_name(), "cpu");
}
