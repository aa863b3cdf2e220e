use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::error::{ReidError, ReidResult};

/// One image, already reduced to its input feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f64>,
    pub pid: i64,
    pub camid: i64,
    /// Rotation class for the self-supervised mode.
    #[serde(default)]
    pub rotation: Option<usize>,
    /// Source image, used only for ranked-result visualization.
    #[serde(default)]
    pub image: Option<PathBuf>,
}

/// Train / query / gallery splits plus identity metadata.
///
/// Train identities are expected to be relabeled to `0..num_train_pids`;
/// query and gallery keep their original identities (`-1` marks junk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReidDataset {
    pub name: String,
    pub train: Vec<Sample>,
    pub query: Vec<Sample>,
    pub gallery: Vec<Sample>,
    pub num_train_pids: usize,
}

impl ReidDataset {
    pub fn load_json(path: &Path) -> ReidResult<ReidDataset> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let dataset: ReidDataset = serde_json::from_reader(reader)?;
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn save_json(&self, path: &Path) -> ReidResult<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Width of every feature vector, taken from the first training sample.
    pub fn feature_dim(&self) -> usize {
        self.train.first()
            .or_else(|| self.query.first())
            .map(|s| s.features.len())
            .unwrap_or(0)
    }

    pub fn validate(&self) -> ReidResult<()> {
        let dim = self.feature_dim();
        for sample in self.train.iter().chain(&self.query).chain(&self.gallery) {
            if sample.features.len() != dim {
                return Err(ReidError::DimensionMismatch { expected: dim, actual: sample.features.len() });
            }
        }
        for sample in &self.train {
            if sample.pid < 0 || sample.pid as usize >= self.num_train_pids {
                return Err(ReidError::LabelOutOfRange { label: sample.pid, classes: self.num_train_pids });
            }
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        let ids = |s: &[Sample]| {
            let mut pids: Vec<i64> = s.iter().map(|x| x.pid).collect();
            pids.sort_unstable();
            pids.dedup();
            pids.len()
        };
        info!("=> {} loaded", self.name);
        info!("  subset   | # ids | # images");
        info!("  train    | {:5} | {:8}", self.num_train_pids, self.train.len());
        info!("  query    | {:5} | {:8}", ids(&self.query), self.query.len());
        info!("  gallery  | {:5} | {:8}", ids(&self.gallery), self.gallery.len());
    }

    /// Shuffled train batches of exactly `batch_size` indices; the trailing
    /// partial batch is dropped.
    pub fn train_batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.train.len()).collect();
        indices.shuffle(rng);
        indices.chunks_exact(batch_size.max(1)).map(|c| c.to_vec()).collect()
    }
}

/// `(pids, camids)` of a split, index-aligned with its samples.
pub fn split_labels(samples: &[Sample]) -> (Vec<i64>, Vec<i64>) {
    samples.iter().map(|s| (s.pid, s.camid)).unzip()
}
