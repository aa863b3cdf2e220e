use std::fmt;

use serde::{Serialize, Deserialize};

use crate::network::model::{OutputHead, ParamScope};
use crate::train::train_config::TrainConfig;

/// Training phase active for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    /// Classifier only; backbone frozen.
    FixedBaseWarmup,
    InitialCrossEntropy,
    AdaptiveSmoothing,
    /// Rotation head only, for the whole run.
    RotationSelfSupervision,
}

impl TrainingPhase {
    pub fn scope(self) -> ParamScope {
        match self {
            TrainingPhase::FixedBaseWarmup => ParamScope::Classifier,
            TrainingPhase::InitialCrossEntropy | TrainingPhase::AdaptiveSmoothing => ParamScope::All,
            TrainingPhase::RotationSelfSupervision => ParamScope::RotationHead,
        }
    }

    pub fn head(self) -> OutputHead {
        match self {
            TrainingPhase::RotationSelfSupervision => OutputHead::Rotation,
            _ => OutputHead::Identity,
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingPhase::FixedBaseWarmup => write!(f, "fixbase"),
            TrainingPhase::InitialCrossEntropy => write!(f, "initial-xent"),
            TrainingPhase::AdaptiveSmoothing => write!(f, "adaptive"),
            TrainingPhase::RotationSelfSupervision => write!(f, "rotation"),
        }
    }
}

/// Epoch-indexed phase and evaluation schedule. Transitions depend on the
/// epoch index alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSchedule {
    pub fixbase_epoch: usize,
    pub initial_train: usize,
    pub max_epoch: usize,
    pub eval_step: i64,
    pub start_eval: usize,
    pub rotation_mode: bool,
    pub freeze_bn: bool,
}

impl PhaseSchedule {
    pub fn from_config(config: &TrainConfig) -> PhaseSchedule {
        PhaseSchedule {
            fixbase_epoch: config.fixbase_epoch,
            initial_train: config.initial_train,
            max_epoch: config.max_epoch,
            eval_step: config.eval_step,
            start_eval: config.start_eval,
            rotation_mode: config.rotation_mode,
            freeze_bn: config.freeze_bn,
        }
    }

    pub fn phase_for(&self, epoch: usize) -> TrainingPhase {
        if self.rotation_mode {
            TrainingPhase::RotationSelfSupervision
        } else if epoch < self.fixbase_epoch {
            TrainingPhase::FixedBaseWarmup
        } else if epoch < self.initial_train {
            TrainingPhase::InitialCrossEntropy
        } else {
            TrainingPhase::AdaptiveSmoothing
        }
    }

    /// Whether normalization statistics stay frozen during `phase`. The
    /// rotation head trains on a fixed backbone, so its statistics are always
    /// frozen.
    pub fn norm_frozen(&self, phase: TrainingPhase) -> bool {
        phase == TrainingPhase::RotationSelfSupervision || self.freeze_bn
    }

    pub fn is_final(&self, epoch: usize) -> bool {
        epoch + 1 == self.max_epoch
    }

    pub fn should_evaluate(&self, epoch: usize) -> bool {
        let done = epoch + 1;
        let periodic = done > self.start_eval
            && self.eval_step > 0
            && done as i64 % self.eval_step == 0;
        periodic || self.is_final(epoch)
    }
}
