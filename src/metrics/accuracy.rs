/// Whether `label` is among the `k` highest-scoring classes of `logits`.
pub fn in_top_k(logits: &[f64], label: usize, k: usize) -> bool {
    let Some(&target) = logits.get(label) else {
        return false;
    };
    // classes strictly ahead of the target, ties resolved in the target's favour
    let ahead = logits.iter().filter(|&&z| z > target).count();
    ahead < k
}

/// Fraction of samples whose label is within the top `k` predictions.
pub fn top_k_accuracy(logits: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    let n = logits.len().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    let correct = logits.iter().zip(labels.iter())
        .filter(|(l, &y)| in_top_k(l, y, k))
        .count();
    correct as f64 / n as f64
}
