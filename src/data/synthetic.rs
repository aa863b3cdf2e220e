use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};

use crate::data::dataset::{ReidDataset, Sample};
use crate::math::matrix::Matrix;
use crate::metrics::ranking::JUNK_PID;

/// Parameters of a generated dataset: each identity is a random prototype,
/// each camera adds a fixed offset, and every sample adds Gaussian noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub feature_dim: usize,
    pub num_train_ids: usize,
    pub num_test_ids: usize,
    pub num_cameras: usize,
    pub samples_per_camera: usize,
    pub num_distractors: usize,
    pub noise: f64,
    pub camera_shift: f64,
    /// When set, every sample is cyclically shifted by a random multiple of
    /// `feature_dim / num_rot_classes` and labeled with that class.
    pub num_rot_classes: Option<usize>,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            feature_dim: 16,
            num_train_ids: 12,
            num_test_ids: 8,
            num_cameras: 3,
            samples_per_camera: 3,
            num_distractors: 4,
            noise: 0.15,
            camera_shift: 0.3,
            num_rot_classes: None,
            seed: 1,
        }
    }
}

struct Generator {
    cfg: SyntheticConfig,
    rng: StdRng,
    camera_offsets: Matrix,
}

impl Generator {
    fn prototype(&mut self) -> Vec<f64> {
        (0..self.cfg.feature_dim).map(|_| self.rng.gen_range(-1.0..1.0)).collect()
    }

    fn sample(&mut self, proto: &[f64], pid: i64, camid: usize) -> Sample {
        let offset = self.camera_offsets.row(camid).to_vec();
        let noise = self.cfg.noise;
        let mut features: Vec<f64> = proto.iter()
            .zip(offset.iter())
            .map(|(p, o)| p + o + noise * self.rng.gen_range(-1.0..1.0))
            .collect();

        let rotation = self.cfg.num_rot_classes.map(|classes| {
            let r = self.rng.gen_range(0..classes);
            let shift = r * self.cfg.feature_dim / classes;
            features.rotate_right(shift);
            r
        });

        Sample { features, pid, camid: camid as i64, rotation, image: None }
    }
}

impl ReidDataset {
    /// Deterministic dataset for smoke runs and tests.
    pub fn synthetic(cfg: &SyntheticConfig) -> ReidDataset {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let camera_offsets = Matrix::from_data(
            (0..cfg.num_cameras.max(1))
                .map(|_| (0..cfg.feature_dim).map(|_| cfg.camera_shift * rng.gen_range(-1.0..1.0)).collect())
                .collect(),
        );
        let mut gen = Generator { cfg: cfg.clone(), rng, camera_offsets };

        let mut train = Vec::new();
        for pid in 0..cfg.num_train_ids {
            let proto = gen.prototype();
            for cam in 0..cfg.num_cameras {
                for _ in 0..cfg.samples_per_camera {
                    train.push(gen.sample(&proto, pid as i64, cam));
                }
            }
        }

        let mut query = Vec::new();
        let mut gallery = Vec::new();
        for t in 0..cfg.num_test_ids {
            let pid = (cfg.num_train_ids + t) as i64;
            let proto = gen.prototype();
            for cam in 0..cfg.num_cameras {
                query.push(gen.sample(&proto, pid, cam));
                for _ in 1..cfg.samples_per_camera.max(2) {
                    gallery.push(gen.sample(&proto, pid, cam));
                }
            }
        }
        for i in 0..cfg.num_distractors {
            let proto = gen.prototype();
            gallery.push(gen.sample(&proto, JUNK_PID, i % cfg.num_cameras.max(1)));
        }

        ReidDataset {
            name: "synthetic".into(),
            train,
            query,
            gallery,
            num_train_pids: cfg.num_train_ids,
        }
    }
}
