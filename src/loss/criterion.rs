use serde::{Serialize, Deserialize};

use crate::error::{ReidError, ReidResult};
use crate::loss::adaptive::AdaptiveLabelSmooth;
use crate::loss::bce::{smoothed_binary_target, BceLoss};
use crate::loss::cross_entropy::{one_hot, smoothed_target, CrossEntropyLoss, LABEL_SMOOTH_EPSILON};
use crate::network::model::{ModelOutput, OutputGrads};
use crate::train::phase::TrainingPhase;

/// Classification loss selected by the scheduler for the active phase.
///
/// - `PlainCrossEntropy`: softmax cross-entropy against one-hot targets.
/// - `LabelSmoothed`:     softmax cross-entropy against smoothed targets.
/// - `AdaptiveSmoothed`:  smoothing weight taken from the model's epsilon output.
/// - `SigmoidVariant`:    independent per-class sigmoid scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    PlainCrossEntropy,
    LabelSmoothed { epsilon: f64 },
    AdaptiveSmoothed,
    SigmoidVariant { label_smooth: Option<f64> },
}

/// Scalar loss for one sample plus the gradients to feed back into the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LossEval {
    pub loss: f64,
    pub grads: OutputGrads,
}

impl LossEval {
    /// Multiplies loss and gradients by `lambda`.
    pub fn scaled(mut self, lambda: f64) -> LossEval {
        self.loss *= lambda;
        for head in &mut self.grads.heads {
            head.iter_mut().for_each(|g| *g *= lambda);
        }
        if let Some(g) = self.grads.epsilon.as_mut() {
            *g *= lambda;
        }
        self
    }
}

impl Criterion {
    /// Loss used before the adaptive phase.
    pub fn simple(use_sigmoid: bool, label_smooth: bool) -> Criterion {
        let smooth = label_smooth.then_some(LABEL_SMOOTH_EPSILON);
        match (use_sigmoid, smooth) {
            (true, smooth) => Criterion::SigmoidVariant { label_smooth: smooth },
            (false, Some(epsilon)) => Criterion::LabelSmoothed { epsilon },
            (false, None) => Criterion::PlainCrossEntropy,
        }
    }

    /// Loss used once the adaptive phase starts. The sigmoid variant has no
    /// adaptive form and keeps plain per-class scoring.
    pub fn adaptive(use_sigmoid: bool) -> Criterion {
        if use_sigmoid {
            Criterion::SigmoidVariant { label_smooth: None }
        } else {
            Criterion::AdaptiveSmoothed
        }
    }

    pub fn for_phase(phase: TrainingPhase, use_sigmoid: bool, label_smooth: bool) -> Criterion {
        match phase {
            TrainingPhase::FixedBaseWarmup | TrainingPhase::InitialCrossEntropy => {
                Criterion::simple(use_sigmoid, label_smooth)
            }
            TrainingPhase::AdaptiveSmoothing => Criterion::adaptive(use_sigmoid),
            TrainingPhase::RotationSelfSupervision => Criterion::PlainCrossEntropy,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Criterion::PlainCrossEntropy => "cross_entropy",
            Criterion::LabelSmoothed { .. } => "label_smoothed_cross_entropy",
            Criterion::AdaptiveSmoothed => "adaptive_label_smooth",
            Criterion::SigmoidVariant { label_smooth: Some(_) } => "label_smoothed_sigmoid",
            Criterion::SigmoidVariant { label_smooth: None } => "sigmoid_bce",
        }
    }

    /// Returns `(loss, ∂L/∂logits, ∂L/∂epsilon)` for one head.
    fn head(&self, logits: &[f64], label: usize, epsilon: Option<f64>) -> ReidResult<(f64, Vec<f64>, Option<f64>)> {
        let k = logits.len();
        if label >= k {
            return Err(ReidError::LabelOutOfRange { label: label as i64, classes: k });
        }
        Ok(match *self {
            Criterion::PlainCrossEntropy => {
                let t = one_hot(label, k);
                (CrossEntropyLoss::loss(logits, &t), CrossEntropyLoss::derivative(logits, &t), None)
            }
            Criterion::LabelSmoothed { epsilon } => {
                let t = smoothed_target(label, k, epsilon);
                (CrossEntropyLoss::loss(logits, &t), CrossEntropyLoss::derivative(logits, &t), None)
            }
            Criterion::AdaptiveSmoothed => {
                let eps = epsilon.ok_or(ReidError::MissingEpsilon)?;
                let (loss, d_logits, d_eps) = AdaptiveLabelSmooth::evaluate(logits, label, eps);
                (loss, d_logits, Some(d_eps))
            }
            Criterion::SigmoidVariant { label_smooth } => {
                let t = match label_smooth {
                    Some(e) => smoothed_binary_target(label, k, e),
                    None => one_hot(label, k),
                };
                (BceLoss::loss(logits, &t), BceLoss::derivative(logits, &t), None)
            }
        })
    }

    /// Applies the loss to every head of `output` and averages (deep
    /// supervision; a single head is the one-element case).
    pub fn evaluate(&self, output: &ModelOutput, label: usize) -> ReidResult<LossEval> {
        if output.heads.is_empty() {
            return Err(ReidError::length_mismatch("model output heads", 1, 0));
        }
        let inv = 1.0 / output.heads.len() as f64;

        let mut loss = 0.0;
        let mut head_grads = Vec::with_capacity(output.heads.len());
        let mut eps_grad: Option<f64> = None;

        for logits in &output.heads {
            let (l, d, de) = self.head(logits, label, output.epsilon)?;
            loss += l * inv;
            head_grads.push(d.into_iter().map(|g| g * inv).collect());
            if let Some(de) = de {
                *eps_grad.get_or_insert(0.0) += de * inv;
            }
        }

        Ok(LossEval {
            loss,
            grads: OutputGrads { heads: head_grads, epsilon: eps_grad },
        })
    }
}
