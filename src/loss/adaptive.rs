use crate::loss::cross_entropy::{log_softmax, smoothed_target, softmax};

/// Cross-entropy against a target smoothed by a model-produced `epsilon`.
///
/// ```text
/// t = (1 - ε) · y + ε / K
/// L = -Σ t_k · log p_k
/// ∂L/∂z = p - t
/// ∂L/∂ε = Σ (y_k - 1/K) · log p_k
/// ```
pub struct AdaptiveLabelSmooth;

impl AdaptiveLabelSmooth {
    /// Returns `(loss, ∂L/∂logits, ∂L/∂epsilon)`.
    pub fn evaluate(logits: &[f64], label: usize, epsilon: f64) -> (f64, Vec<f64>, f64) {
        let k = logits.len();
        let eps = epsilon.clamp(0.0, 1.0);
        let target = smoothed_target(label, k, eps);
        let log_p = log_softmax(logits);

        let loss = -target.iter().zip(log_p.iter()).map(|(t, lp)| t * lp).sum::<f64>();
        let d_logits = softmax(logits).iter().zip(target.iter()).map(|(p, t)| p - t).collect();

        let inv_k = 1.0 / k as f64;
        let d_eps = log_p.iter().enumerate()
            .map(|(i, lp)| {
                let y = if i == label { 1.0 } else { 0.0 };
                (y - inv_k) * lp
            })
            .sum();

        (loss, d_logits, d_eps)
    }
}
