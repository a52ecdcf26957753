//! Seam between the prediction service and the network implementation

use candle_core::Tensor;
use skinlens_shared::Result;

/// A network mapping an image tensor and a metadata tensor to class scores
///
/// Implementations are immutable after construction and are shared across
/// request threads, so `logits` must be safe to call concurrently.
pub trait Classifier: Send + Sync {
    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Unnormalised class scores of shape `(1, num_classes)`
    ///
    /// `image` is `(1, 3, 224, 224)` and `metadata` is `(1, N)`.
    fn logits(&self, image: &Tensor, metadata: &Tensor) -> Result<Tensor>;
}
