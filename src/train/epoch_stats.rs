use serde::{Serialize, Deserialize};

use crate::train::phase::TrainingPhase;

/// Scores produced by one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Score handed to the checkpoint manager: rank-1, or rotation top-1
    /// accuracy in rotation mode.
    pub score: f64,
    pub map: Option<f64>,
    pub rank5: Option<f64>,
    pub is_best: bool,
}

/// Per-epoch statistics emitted by `train_loop`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the loop sends
/// one value at the end of every completed epoch; the full history is also
/// returned in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    pub phase: TrainingPhase,
    pub criterion: String,
    /// Mean total (scaled) loss over the epoch.
    pub train_loss: f64,
    /// Mean unscaled classification loss.
    pub xent_loss: f64,
    /// Mean epsilon produced by the model, when it produced one.
    pub mean_epsilon: Option<f64>,
    pub learning_rate: f64,
    pub elapsed_ms: u64,
    pub eval: Option<EvalRecord>,
}
