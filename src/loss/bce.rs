use crate::activation::activation::sigmoid;

/// Per-class independent sigmoid + binary cross-entropy over logits, used
/// instead of joint softmax when the sigmoid variant is selected.
pub struct BceLoss;

const EPS: f64 = 1e-12;

impl BceLoss {
    /// Scalar BCE: -mean(t·log(σ(z)+ε) + (1-t)·log(1-σ(z)+ε))
    pub fn loss(logits: &[f64], target: &[f64]) -> f64 {
        let n = logits.len() as f64;
        logits.iter().zip(target.iter())
            .map(|(&z, t)| {
                let p = sigmoid(z);
                -(t * (p + EPS).ln() + (1.0 - t) * (1.0 - p + EPS).ln())
            })
            .sum::<f64>() / n
    }

    /// ∂L/∂z = (σ(z) - t) / n
    pub fn derivative(logits: &[f64], target: &[f64]) -> Vec<f64> {
        let n = logits.len() as f64;
        logits.iter().zip(target.iter())
            .map(|(&z, t)| (sigmoid(z) - t) / n)
            .collect()
    }
}

/// Binary targets smoothed toward 0.5: t · (1 - ε) + ε / 2
pub fn smoothed_binary_target(label: usize, classes: usize, epsilon: f64) -> Vec<f64> {
    (0..classes)
        .map(|i| {
            let y = if i == label { 1.0 } else { 0.0 };
            y * (1.0 - epsilon) + epsilon / 2.0
        })
        .collect()
}
