/// Categorical cross-entropy over raw logits (log-softmax applied internally).
pub struct CrossEntropyLoss;

/// Smoothing weight used when label smoothing is switched on.
pub const LABEL_SMOOTH_EPSILON: f64 = 0.1;

impl CrossEntropyLoss {
    /// L = -Σ target[i] · log_softmax(logits)[i]
    ///
    /// `target` is a one-hot or smoothed distribution over the classes.
    pub fn loss(logits: &[f64], target: &[f64]) -> f64 {
        log_softmax(logits).iter().zip(target.iter())
            .map(|(lp, t)| -t * lp)
            .sum()
    }

    /// ∂L/∂logits = softmax(logits) - target
    pub fn derivative(logits: &[f64], target: &[f64]) -> Vec<f64> {
        softmax(logits).iter().zip(target.iter())
            .map(|(p, t)| p - t)
            .collect()
    }
}

pub fn log_softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let log_sum = logits.iter().map(|z| (z - max).exp()).sum::<f64>().ln() + max;
    logits.iter().map(|z| z - log_sum).collect()
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    log_softmax(logits).into_iter().map(f64::exp).collect()
}

pub fn one_hot(label: usize, classes: usize) -> Vec<f64> {
    let mut v = vec![0.0; classes];
    v[label] = 1.0;
    v
}

/// (1 - ε) · onehot + ε / K
pub fn smoothed_target(label: usize, classes: usize, epsilon: f64) -> Vec<f64> {
    let uniform = epsilon / classes as f64;
    let mut v = vec![uniform; classes];
    v[label] += 1.0 - epsilon;
    v
}
