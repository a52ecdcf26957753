//! Hybrid image + metadata classifier
//!
//! The architecture is declared once as a [`HybridConfig`]; weight loading
//! and the forward pass are both driven by it. Parameter names match the
//! PyTorch state dict of the trained network:
//!
//! - `densenet.features.*`: DenseNet image branch
//! - `meta_net.{0,4,8}` linear / `meta_net.{2,6,10}` batch norm
//! - `classifier.{0,4,8,12}` linear / `classifier.{2,6,10,14}` batch norm,
//!   `classifier.16` output layer

pub mod blocks;
pub mod densenet;

pub use blocks::{DenseSpec, DenseStage};
pub use densenet::{DenseNet, DenseNetConfig};

use crate::traits::Classifier;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use skinlens_shared::{Result, SkinlensError};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Buffer PyTorch stores next to batch-norm statistics; never read here
const NUM_BATCHES_TRACKED: &str = "num_batches_tracked";

/// Declarative description of the hybrid network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Image branch
    pub backbone: DenseNetConfig,
    /// Width of the encoded metadata vector
    pub metadata_features: usize,
    /// Number of output classes
    pub num_classes: usize,
    /// Metadata branch stages
    pub metadata_layers: Vec<DenseSpec>,
    /// Classification head stages before the output layer
    pub head_layers: Vec<DenseSpec>,
}

impl HybridConfig {
    /// The skin-lesion network: DenseNet-121 plus the trained MLP shapes
    pub fn skin_lesion(metadata_features: usize, num_classes: usize) -> Self {
        Self::with_backbone(DenseNetConfig::densenet121(), metadata_features, num_classes)
    }

    /// Same branch and head shapes on a different backbone
    pub fn with_backbone(
        backbone: DenseNetConfig,
        metadata_features: usize,
        num_classes: usize,
    ) -> Self {
        Self {
            backbone,
            metadata_features,
            num_classes,
            metadata_layers: vec![
                DenseSpec::new(128, 0.4),
                DenseSpec::new(128, 0.3),
                DenseSpec::new(64, 0.2),
            ],
            head_layers: vec![
                DenseSpec::new(1024, 0.5),
                DenseSpec::new(512, 0.5),
                DenseSpec::new(128, 0.5),
                DenseSpec::new(128, 0.5),
            ],
        }
    }

    /// Width of the concatenated image + metadata features
    pub fn fused_features(&self) -> usize {
        let metadata_out = self
            .metadata_layers
            .last()
            .map_or(self.metadata_features, |spec| spec.out_features);
        self.backbone.num_features() + metadata_out
    }

    /// Rejects degenerate shapes before any weights are touched
    pub fn validate(&self) -> Result<()> {
        if self.metadata_features == 0 {
            return Err(SkinlensError::model("Metadata feature width is zero", None));
        }
        if self.num_classes == 0 {
            return Err(SkinlensError::model("Class count is zero", None));
        }
        if self.backbone.block_config.is_empty() || self.backbone.growth_rate == 0 {
            return Err(SkinlensError::model("DenseNet backbone has no layers", None));
        }
        let stages = self.metadata_layers.iter().chain(&self.head_layers);
        for spec in stages {
            if spec.out_features == 0 || !(0.0..1.0).contains(&spec.dropout) {
                return Err(SkinlensError::model(
                    format!("Invalid dense stage {:?}", spec),
                    None,
                ));
            }
        }
        Ok(())
    }
}

/// Loaded hybrid network, fixed in inference mode
#[derive(Debug, Clone)]
pub struct HybridClassifier {
    densenet: DenseNet,
    meta_net: Vec<DenseStage>,
    head: Vec<DenseStage>,
    output: Linear,
    config: HybridConfig,
}

impl HybridClassifier {
    /// Builds the network from `vb` according to `config`
    pub fn new(config: &HybridConfig, vb: VarBuilder<'_>) -> candle_core::Result<Self> {
        let densenet = DenseNet::new(&config.backbone, vb.pp("densenet"))?;
        let (meta_net, metadata_out) = blocks::load_stages(
            config.metadata_features,
            &config.metadata_layers,
            &vb.pp("meta_net"),
        )?;

        let classifier_vb = vb.pp("classifier");
        let (head, head_out) = blocks::load_stages(
            densenet.num_features() + metadata_out,
            &config.head_layers,
            &classifier_vb,
        )?;
        let output = candle_nn::linear(
            head_out,
            config.num_classes,
            classifier_vb.pp((config.head_layers.len() * 4).to_string()),
        )?;

        Ok(Self {
            densenet,
            meta_net,
            head,
            output,
            config: config.clone(),
        })
    }

    /// Loads weights from a `.safetensors` file or a PyTorch state dict
    ///
    /// Any tensor that is missing, whose shape differs from the declared
    /// architecture, or that the architecture never reads is reported as a
    /// model error. `num_batches_tracked` buffers are ignored.
    pub fn load(config: &HybridConfig, weights: &Path, device: &Device) -> Result<Self> {
        config.validate()?;

        let is_safetensors = weights
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));

        let vb = if is_safetensors {
            // SAFETY: the weight file is opened read-only and never modified while mapped
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device) }
        } else {
            VarBuilder::from_pth(weights, DType::F32, device)
        }
        .map_err(|e| {
            SkinlensError::model(
                format!("Failed to open weights {}", weights.display()),
                Some(Box::new(e)),
            )
        })?;

        let model = Self::new(config, vb).map_err(|e| {
            SkinlensError::model(
                format!(
                    "Weights {} do not match the declared architecture: {}",
                    weights.display(),
                    e
                ),
                Some(Box::new(e)),
            )
        })?;
        check_unexpected_tensors(config, weights, is_safetensors)?;

        info!(
            weights = %weights.display(),
            image_features = model.densenet.num_features(),
            metadata_features = config.metadata_features,
            fused_features = config.fused_features(),
            num_classes = config.num_classes,
            "Loaded hybrid classifier"
        );
        Ok(model)
    }

    /// Every parameter name the declared architecture reads
    pub fn parameter_names(config: &HybridConfig) -> Result<BTreeSet<String>> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Self::new(config, vb).map_err(|e| {
            SkinlensError::model(
                format!("Failed to build the declared architecture: {}", e),
                Some(Box::new(e)),
            )
        })?;

        let data = varmap
            .data()
            .lock()
            .map_err(|_| SkinlensError::internal("Parameter map lock poisoned", None))?;
        Ok(data.keys().cloned().collect())
    }

    /// Architecture this network was built from
    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    fn forward_logits(&self, image: &Tensor, metadata: &Tensor) -> candle_core::Result<Tensor> {
        let image_features = self.densenet.forward(image)?;
        let metadata_features = blocks::forward_stages(&self.meta_net, metadata)?;
        let fused = Tensor::cat(&[&image_features, &metadata_features], 1)?;
        let hidden = blocks::forward_stages(&self.head, &fused)?;
        self.output.forward(&hidden)
    }
}

impl Classifier for HybridClassifier {
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn logits(&self, image: &Tensor, metadata: &Tensor) -> Result<Tensor> {
        self.forward_logits(image, metadata)
            .map_err(|e| crate::inference_error("hybrid classifier forward pass", e))
    }
}

fn stored_tensor_names(weights: &Path, is_safetensors: bool) -> candle_core::Result<Vec<String>> {
    if is_safetensors {
        // SAFETY: the weight file is opened read-only and never modified while mapped
        let tensors = unsafe { candle_core::safetensors::MmapedSafetensors::new(weights)? };
        Ok(tensors.tensors().into_iter().map(|(name, _)| name).collect())
    } else {
        Ok(candle_core::pickle::read_pth_tensor_info(weights, false, None)?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }
}

/// Rejects weight files carrying tensors the architecture never reads
fn check_unexpected_tensors(
    config: &HybridConfig,
    weights: &Path,
    is_safetensors: bool,
) -> Result<()> {
    let expected = HybridClassifier::parameter_names(config)?;
    let stored = stored_tensor_names(weights, is_safetensors).map_err(|e| {
        SkinlensError::model(
            format!("Failed to list tensors in {}", weights.display()),
            Some(Box::new(e)),
        )
    })?;

    let mut unexpected: Vec<String> = stored
        .into_iter()
        .filter(|name| !name.ends_with(NUM_BATCHES_TRACKED) && !expected.contains(name))
        .collect();
    if unexpected.is_empty() {
        debug!(parameters = expected.len(), "Weight file keys match the architecture");
        return Ok(());
    }

    unexpected.sort();
    Err(SkinlensError::model(
        format!(
            "Weights {} contain tensors not used by the declared architecture: {}",
            weights.display(),
            unexpected.join(", ")
        ),
        None,
    ))
}
