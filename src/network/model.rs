use crate::error::ReidResult;
use crate::optim::sgd::Sgd;

/// Which output branch a training forward pass drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputHead {
    /// Identity logits (one or more heads) plus the epsilon scalar.
    Identity,
    /// Rotation-class logits from the self-supervised head.
    Rotation,
}

/// Parameters an optimizer step is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamScope {
    All,
    /// Only the identity classifier heads; the backbone stays fixed.
    Classifier,
    RotationHead,
}

/// Result of one training-mode forward pass for a single sample.
///
/// `heads` holds 1+ score vectors: the primary classifier first, followed by
/// any deep-supervision heads.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub heads: Vec<Vec<f64>>,
    pub epsilon: Option<f64>,
}

/// Loss gradients matching the shape of a [`ModelOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGrads {
    pub heads: Vec<Vec<f64>>,
    pub epsilon: Option<f64>,
}

/// The feature-extraction model driven by the training scheduler.
pub trait ReidModel {
    /// Training-mode forward pass over one sample.
    fn forward(&mut self, input: &[f64], head: OutputHead) -> ModelOutput;

    /// Accumulates gradients for the most recent `forward`.
    fn backward(&mut self, grads: &OutputGrads);

    /// Applies accumulated gradients (averaged over `batch_len`) to the
    /// parameters in `scope`, then discards every accumulated gradient.
    fn step(&mut self, scope: ParamScope, optimizer: &Sgd, batch_len: usize);

    /// Width of the feature vectors `forward` and `features` accept.
    fn input_dim(&self) -> usize;

    /// Eval-mode embedding used for retrieval.
    fn features(&self, input: &[f64]) -> Vec<f64>;

    /// Eval-mode rotation logits.
    fn rotation_logits(&self, input: &[f64]) -> Vec<f64>;

    fn has_classifier(&self) -> bool;

    /// Freezes (or unfreezes) running statistics of normalization layers.
    fn set_norm_frozen(&mut self, frozen: bool);

    fn num_params(&self) -> usize;

    /// Opaque serializable snapshot of every parameter.
    fn state(&self) -> ReidResult<serde_json::Value>;

    /// Restores a snapshot. With `strict` every tensor must be present with a
    /// matching shape; otherwise mismatching tensors are skipped. Returns the
    /// number of tensors loaded.
    fn load_state(&mut self, state: &serde_json::Value, strict: bool) -> ReidResult<usize>;
}
