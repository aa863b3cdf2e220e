/// Streaming mean of a scalar, weighted by sample count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: usize,
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> AverageMeter {
        AverageMeter::default()
    }

    pub fn reset(&mut self) {
        *self = AverageMeter::default();
    }

    /// Records `val` as the mean of `n` samples.
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_average() {
        let mut m = AverageMeter::new();
        m.update(1.0, 1);
        m.update(4.0, 3);
        assert_eq!(m.val, 4.0);
        assert_eq!(m.count, 4);
        assert!((m.avg - 13.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn zero_count_update_keeps_average() {
        let mut m = AverageMeter::new();
        m.update(2.0, 0);
        assert_eq!(m.avg, 0.0);
        m.reset();
        assert_eq!(m, AverageMeter::default());
    }
}
