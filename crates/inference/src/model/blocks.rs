use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, Dropout, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Dropout and batch norm always run in inference mode
pub(crate) const TRAINING: bool = false;

/// PyTorch's default batch-norm epsilon
pub(crate) const BATCH_NORM_EPS: f64 = 1e-5;

/// One `Linear → ReLU → BatchNorm → Dropout` stage of an MLP
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenseSpec {
    /// Width of the linear layer's output
    pub out_features: usize,
    /// Dropout probability (inactive at inference)
    pub dropout: f32,
}

impl DenseSpec {
    /// Shorthand constructor used by architecture declarations
    pub const fn new(out_features: usize, dropout: f32) -> Self {
        Self {
            out_features,
            dropout,
        }
    }
}

/// Loaded weights for one [`DenseSpec`]
///
/// Parameter names mirror an `nn.Sequential` where each stage occupies four
/// slots: the linear layer at `4i`, ReLU at `4i + 1`, batch norm at `4i + 2`
/// and dropout at `4i + 3`.
#[derive(Debug, Clone)]
pub struct DenseStage {
    linear: Linear,
    norm: BatchNorm,
    dropout: Dropout,
}

impl DenseStage {
    /// Loads stage `index` of the sequential rooted at `vb`
    pub fn new(
        in_features: usize,
        spec: &DenseSpec,
        index: usize,
        vb: &VarBuilder<'_>,
    ) -> Result<Self> {
        let slot = index * 4;
        let linear = candle_nn::linear(in_features, spec.out_features, vb.pp(slot.to_string()))?;
        let norm = candle_nn::batch_norm(
            spec.out_features,
            BATCH_NORM_EPS,
            vb.pp((slot + 2).to_string()),
        )?;

        Ok(Self {
            linear,
            norm,
            dropout: Dropout::new(spec.dropout),
        })
    }
}

impl Module for DenseStage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.linear.forward(xs)?.relu()?;
        let xs = self.norm.forward_t(&xs, TRAINING)?;
        self.dropout.forward_t(&xs, TRAINING)
    }
}

/// Runs `xs` through every stage in order
pub(crate) fn forward_stages(stages: &[DenseStage], xs: &Tensor) -> Result<Tensor> {
    stages
        .iter()
        .try_fold(xs.clone(), |xs, stage| stage.forward(&xs))
}

/// Loads a stack of stages, returning them with the final output width
pub(crate) fn load_stages(
    in_features: usize,
    specs: &[DenseSpec],
    vb: &VarBuilder<'_>,
) -> Result<(Vec<DenseStage>, usize)> {
    let mut width = in_features;
    let mut stages = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        stages.push(DenseStage::new(width, spec, index, vb)?);
        width = spec.out_features;
    }
    Ok((stages, width))
}
