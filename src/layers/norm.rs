use serde::{Serialize, Deserialize};

const EPS: f64 = 1e-5;

/// Per-feature standardization with running statistics, the embedding's
/// normalization layer.
///
/// In training mode the running mean/variance are updated with `momentum`
/// unless the layer is frozen; normalization always uses the running values,
/// so backward treats them as constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningNorm {
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
    pub momentum: f64,
    #[serde(skip)]
    pub frozen: bool,
}

impl RunningNorm {
    pub fn new(size: usize) -> RunningNorm {
        RunningNorm {
            running_mean: vec![0.0; size],
            running_var: vec![1.0; size],
            momentum: 0.1,
            frozen: false,
        }
    }

    pub fn size(&self) -> usize {
        self.running_mean.len()
    }

    pub fn feed_from(&mut self, input: &[f64]) -> Vec<f64> {
        if !self.frozen {
            let m = self.momentum;
            for ((mean, var), &x) in self.running_mean.iter_mut()
                .zip(self.running_var.iter_mut())
                .zip(input.iter())
            {
                let diff = x - *mean;
                *mean += m * diff;
                *var = (1.0 - m) * *var + m * diff * diff;
            }
        }
        self.infer(input)
    }

    pub fn infer(&self, input: &[f64]) -> Vec<f64> {
        input.iter()
            .zip(self.running_mean.iter().zip(self.running_var.iter()))
            .map(|(&x, (&mean, &var))| (x - mean) / (var + EPS).sqrt())
            .collect()
    }

    pub fn backward(&self, delta: &[f64]) -> Vec<f64> {
        delta.iter()
            .zip(self.running_var.iter())
            .map(|(&d, &var)| d / (var + EPS).sqrt())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_norm_keeps_running_statistics() {
        let mut norm = RunningNorm::new(2);
        norm.frozen = true;
        norm.feed_from(&[5.0, -5.0]);
        assert_eq!(norm.running_mean, vec![0.0, 0.0]);
        assert_eq!(norm.running_var, vec![1.0, 1.0]);
    }

    #[test]
    fn unfrozen_norm_tracks_inputs() {
        let mut norm = RunningNorm::new(1);
        norm.feed_from(&[10.0]);
        assert!((norm.running_mean[0] - 1.0).abs() < 1e-12);
    }
}
