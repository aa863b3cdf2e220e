use crate::optim::sgd::Sgd;

/// Multi-step learning-rate decay: the rate is multiplied by `gamma` each
/// time the epoch counter passes one of `milestones`.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    last_epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> MultiStepLr {
        milestones.sort_unstable();
        MultiStepLr { base_lr, milestones, gamma, last_epoch: 0 }
    }

    /// Learning rate in effect after `epoch` completed epochs.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }

    /// Jumps the schedule to `epoch` (used when resuming).
    pub fn fast_forward(&mut self, epoch: usize, optimizer: &mut Sgd) {
        self.last_epoch = epoch;
        optimizer.learning_rate = self.lr_at(epoch);
    }

    /// Advances one epoch and writes the new rate into `optimizer`.
    pub fn step(&mut self, optimizer: &mut Sgd) -> f64 {
        self.last_epoch += 1;
        optimizer.learning_rate = self.lr_at(self.last_epoch);
        optimizer.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_at_each_milestone() {
        let mut opt = Sgd::new(0.1);
        let mut sched = MultiStepLr::new(0.1, vec![2, 4], 0.1);
        let lrs: Vec<f64> = (0..5).map(|_| sched.step(&mut opt)).collect();
        let expected = [0.1, 0.01, 0.01, 0.001, 0.001];
        for (got, want) in lrs.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12, "{got} != {want}");
        }
    }
}
