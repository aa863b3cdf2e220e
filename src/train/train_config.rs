use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};

use serde::{Serialize, Deserialize};

use crate::error::ConfigError;
use crate::metrics::distance::DistanceMetric;
use crate::metrics::ranking::{EvalOptions, EvalProtocol};
use crate::train::epoch_stats::EpochStats;

/// Configuration for a `train_loop` run.
///
/// Epoch indices are 0-based; `eval_step`, `start_eval` and the checkpoint
/// file names count epochs 1-based, as an operator reads them.
///
/// Runtime-only fields:
/// - `progress_tx`: optional channel; one `EpochStats` is sent per completed
///                   epoch.
/// - `stop_flag`:   optional atomic flag; when set from another thread (or a
///                   signal handler) training flushes an interrupt checkpoint
///                   at the next batch boundary and returns
///                   [`ReidError::Interrupted`](crate::error::ReidError::Interrupted).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub max_epoch: usize,
    pub start_epoch: usize,
    pub train_batch: usize,
    pub test_batch: usize,

    pub lr: f64,
    pub weight_decay: f64,
    /// Turns on the multi-step learning-rate policy below.
    pub lr_schedule: bool,
    pub stepsize: Vec<usize>,
    pub gamma: f64,

    /// Leading epochs during which only the classifier is trained.
    pub fixbase_epoch: usize,
    pub fixbase_lr: f64,
    pub freeze_bn: bool,

    pub label_smooth: bool,
    pub use_sigmoid: bool,
    /// Epoch at which training switches to adaptive label smoothing.
    pub initial_train: usize,
    pub lambda_xent: f64,

    /// Evaluate every N epochs; `-1` evaluates only after the final epoch.
    pub eval_step: i64,
    pub start_eval: usize,
    pub use_metric_cuhk03: bool,
    pub metric: DistanceMetric,
    pub max_rank: Option<usize>,

    /// Train a rotation-prediction head instead of identities for the whole run.
    pub rotation_mode: bool,
    pub num_rot_classes: usize,

    pub print_freq: usize,
    pub seed: u64,
    pub save_dir: PathBuf,
    pub resume: Option<PathBuf>,
    pub load_weights: Option<PathBuf>,

    #[serde(skip)]
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
    #[serde(skip)]
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            max_epoch: 60,
            start_epoch: 0,
            train_batch: 32,
            test_batch: 100,
            lr: 3e-4,
            weight_decay: 5e-4,
            lr_schedule: false,
            stepsize: vec![20, 40],
            gamma: 0.1,
            fixbase_epoch: 0,
            fixbase_lr: 3e-4,
            freeze_bn: false,
            label_smooth: false,
            use_sigmoid: false,
            initial_train: 0,
            lambda_xent: 1.0,
            eval_step: -1,
            start_eval: 0,
            use_metric_cuhk03: false,
            metric: DistanceMetric::SquaredEuclidean,
            max_rank: None,
            rotation_mode: false,
            num_rot_classes: 8,
            print_freq: 10,
            seed: 1,
            save_dir: PathBuf::from("log"),
            resume: None,
            load_weights: None,
            progress_tx: None,
            stop_flag: None,
        }
    }
}

impl TrainConfig {
    pub fn from_json(path: &Path) -> Result<TrainConfig, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::FileRead { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| ConfigError::ParseError { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_epoch == 0 {
            return Err(ConfigError::invalid_value("max_epoch", "must be at least 1"));
        }
        if self.start_epoch >= self.max_epoch {
            return Err(ConfigError::invalid_value(
                "start_epoch",
                format!("{} leaves no epoch to run (max_epoch = {})", self.start_epoch, self.max_epoch),
            ));
        }
        if self.train_batch == 0 {
            return Err(ConfigError::invalid_value("train_batch", "must be at least 1"));
        }
        if self.test_batch == 0 {
            return Err(ConfigError::invalid_value("test_batch", "must be at least 1"));
        }
        if !(self.lr > 0.0) || !(self.fixbase_lr > 0.0) {
            return Err(ConfigError::invalid_value("lr", "learning rates must be positive"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ConfigError::invalid_value("gamma", format!("{} is outside (0, 1]", self.gamma)));
        }
        if self.eval_step == 0 || self.eval_step < -1 {
            return Err(ConfigError::invalid_value("eval_step", "must be positive or -1"));
        }
        if self.rotation_mode && self.num_rot_classes < 2 {
            return Err(ConfigError::invalid_value("num_rot_classes", "need at least two rotation classes"));
        }
        if self.print_freq == 0 {
            return Err(ConfigError::invalid_value("print_freq", "must be at least 1"));
        }
        Ok(())
    }

    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            protocol: if self.use_metric_cuhk03 {
                EvalProtocol::cuhk03(self.seed)
            } else {
                EvalProtocol::Standard
            },
            max_rank: self.max_rank,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }
}
