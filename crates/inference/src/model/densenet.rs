//! DenseNet feature extractor
//!
//! Follows the torchvision layout so a state dict saved from
//! `torchvision.models.densenet121` loads without renaming:
//! `features.conv0`, `features.norm0`, `features.denseblock{b}.denselayer{l}`,
//! `features.transition{b}` and `features.norm5`. The classifier layer is
//! not part of this module; `forward` ends with global average pooling.

use super::blocks::{BATCH_NORM_EPS, TRAINING};
use candle_core::{Module, ModuleT, Result, Tensor, D};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, VarBuilder};
use serde::{Deserialize, Serialize};

/// Shape parameters of a DenseNet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseNetConfig {
    /// Channels added by every dense layer
    pub growth_rate: usize,
    /// Number of dense layers in each block
    pub block_config: Vec<usize>,
    /// Channels produced by the stem convolution
    pub num_init_features: usize,
    /// Bottleneck multiplier for the 1x1 convolution
    pub bn_size: usize,
}

impl DenseNetConfig {
    /// DenseNet-121
    pub fn densenet121() -> Self {
        Self {
            growth_rate: 32,
            block_config: vec![6, 12, 24, 16],
            num_init_features: 64,
            bn_size: 4,
        }
    }

    /// Width of the pooled feature vector
    pub fn num_features(&self) -> usize {
        let mut features = self.num_init_features;
        for (index, layers) in self.block_config.iter().enumerate() {
            features += layers * self.growth_rate;
            if index + 1 != self.block_config.len() {
                features /= 2;
            }
        }
        features
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    norm1: BatchNorm,
    conv1: Conv2d,
    norm2: BatchNorm,
    conv2: Conv2d,
}

impl DenseLayer {
    fn new(
        in_channels: usize,
        growth_rate: usize,
        bn_size: usize,
        vb: VarBuilder<'_>,
    ) -> Result<Self> {
        let bottleneck = bn_size * growth_rate;
        let norm1 = candle_nn::batch_norm(in_channels, BATCH_NORM_EPS, vb.pp("norm1"))?;
        let conv1 = candle_nn::conv2d_no_bias(
            in_channels,
            bottleneck,
            1,
            Conv2dConfig::default(),
            vb.pp("conv1"),
        )?;
        let norm2 = candle_nn::batch_norm(bottleneck, BATCH_NORM_EPS, vb.pp("norm2"))?;
        let conv2 = candle_nn::conv2d_no_bias(
            bottleneck,
            growth_rate,
            3,
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("conv2"),
        )?;

        Ok(Self {
            norm1,
            conv1,
            norm2,
            conv2,
        })
    }

    /// Returns only the `growth_rate` new channels
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = self.norm1.forward_t(xs, TRAINING)?.relu()?;
        let ys = self.conv1.forward(&ys)?;
        let ys = self.norm2.forward_t(&ys, TRAINING)?.relu()?;
        self.conv2.forward(&ys)
    }
}

#[derive(Debug, Clone)]
struct DenseBlock {
    layers: Vec<DenseLayer>,
}

impl DenseBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut features = xs.clone();
        for layer in &self.layers {
            let new_features = layer.forward(&features)?;
            features = Tensor::cat(&[&features, &new_features], 1)?;
        }
        Ok(features)
    }
}

#[derive(Debug, Clone)]
struct Transition {
    norm: BatchNorm,
    conv: Conv2d,
}

impl Transition {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.norm.forward_t(xs, TRAINING)?.relu()?;
        self.conv.forward(&xs)?.avg_pool2d(2)
    }
}

/// DenseNet backbone with the classification layer removed
#[derive(Debug, Clone)]
pub struct DenseNet {
    conv0: Conv2d,
    norm0: BatchNorm,
    blocks: Vec<DenseBlock>,
    transitions: Vec<Transition>,
    norm5: BatchNorm,
    num_features: usize,
}

impl DenseNet {
    /// Loads the backbone from `vb`, which should point at the module that
    /// owns `features`
    pub fn new(config: &DenseNetConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let vb = vb.pp("features");
        let conv0 = candle_nn::conv2d_no_bias(
            3,
            config.num_init_features,
            7,
            Conv2dConfig {
                padding: 3,
                stride: 2,
                ..Default::default()
            },
            vb.pp("conv0"),
        )?;
        let norm0 =
            candle_nn::batch_norm(config.num_init_features, BATCH_NORM_EPS, vb.pp("norm0"))?;

        let mut channels = config.num_init_features;
        let mut blocks = Vec::with_capacity(config.block_config.len());
        let mut transitions = Vec::with_capacity(config.block_config.len().saturating_sub(1));

        for (index, num_layers) in config.block_config.iter().enumerate() {
            let block_vb = vb.pp(format!("denseblock{}", index + 1));
            let mut layers = Vec::with_capacity(*num_layers);
            for layer in 0..*num_layers {
                layers.push(DenseLayer::new(
                    channels + layer * config.growth_rate,
                    config.growth_rate,
                    config.bn_size,
                    block_vb.pp(format!("denselayer{}", layer + 1)),
                )?);
            }
            blocks.push(DenseBlock { layers });
            channels += num_layers * config.growth_rate;

            if index + 1 != config.block_config.len() {
                let transition_vb = vb.pp(format!("transition{}", index + 1));
                transitions.push(Transition {
                    norm: candle_nn::batch_norm(
                        channels,
                        BATCH_NORM_EPS,
                        transition_vb.pp("norm"),
                    )?,
                    conv: candle_nn::conv2d_no_bias(
                        channels,
                        channels / 2,
                        1,
                        Conv2dConfig::default(),
                        transition_vb.pp("conv"),
                    )?,
                });
                channels /= 2;
            }
        }

        let norm5 = candle_nn::batch_norm(channels, BATCH_NORM_EPS, vb.pp("norm5"))?;

        Ok(Self {
            conv0,
            norm0,
            blocks,
            transitions,
            norm5,
            num_features: channels,
        })
    }

    /// Width of the pooled feature vector
    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

impl Module for DenseNet {
    /// `(B, 3, H, W)` → `(B, num_features)`
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv0.forward(xs)?;
        let xs = self.norm0.forward_t(&xs, TRAINING)?.relu()?;
        // 3x3/2 max pool with padding 1; zero padding is exact after ReLU
        let mut xs = xs
            .pad_with_zeros(D::Minus2, 1, 1)?
            .pad_with_zeros(D::Minus1, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for (index, block) in self.blocks.iter().enumerate() {
            xs = block.forward(&xs)?;
            if let Some(transition) = self.transitions.get(index) {
                xs = transition.forward(&xs)?;
            }
        }

        let xs = self.norm5.forward_t(&xs, TRAINING)?.relu()?;
        xs.mean((2, 3))
    }
}
