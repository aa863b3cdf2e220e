//! Best-score tracking and checkpoint persistence.
//!
//! A checkpoint is a JSON document `{ "model_state", "epoch", "score" }`.
//! Scores are rank-1 accuracy (or rotation accuracy); checkpoints written
//! outside of an evaluation carry the sentinel score `-1`.
//!
//! Every file is written to a temporary sibling, synced, then renamed over
//! the target, so a crash mid-write never leaves a truncated checkpoint.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::error::{ReidError, ReidResult};

/// Score recorded for checkpoints taken without an evaluation.
pub const SENTINEL_SCORE: f64 = -1.0;

/// Copy of the best-scoring checkpoint kept next to the per-epoch ones.
pub const BEST_CHECKPOINT_FILE: &str = "best_model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub model_state: serde_json::Value,
    /// 0-based index of the last completed epoch.
    pub epoch: usize,
    pub score: f64,
}

/// Best score seen so far in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestRecord {
    pub score: f64,
    pub epoch: Option<usize>,
}

impl Default for BestRecord {
    fn default() -> Self {
        BestRecord { score: f64::NEG_INFINITY, epoch: None }
    }
}

/// Outcome of recording one evaluated epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointDecision {
    pub is_best: bool,
    pub checkpoint: Checkpoint,
}

/// Tracks the best score of a run. `is_best` is reported only on strict
/// improvement, so ties keep the earlier epoch.
#[derive(Debug, Clone, Default)]
pub struct CheckpointManager {
    best: BestRecord,
}

impl CheckpointManager {
    pub fn new() -> CheckpointManager {
        CheckpointManager::default()
    }

    /// Restores tracking from a resumed checkpoint.
    pub fn resume_from(best: BestRecord) -> CheckpointManager {
        CheckpointManager { best }
    }

    pub fn best(&self) -> BestRecord {
        self.best
    }

    pub fn record(&mut self, score: f64, epoch: usize, model_state: serde_json::Value) -> CheckpointDecision {
        let is_best = score > self.best.score;
        if is_best {
            self.best = BestRecord { score, epoch: Some(epoch) };
        }
        CheckpointDecision {
            is_best,
            checkpoint: Checkpoint { model_state, epoch, score },
        }
    }

    /// Checkpoint taken outside an evaluation; leaves the best record alone.
    pub fn sentinel(epoch: usize, model_state: serde_json::Value) -> Checkpoint {
        Checkpoint { model_state, epoch, score: SENTINEL_SCORE }
    }
}

/// Directory of checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> ReidResult<CheckpointStore> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| ReidError::checkpoint(format!("cannot create directory: {e}"), &dir))?;
        Ok(CheckpointStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn epoch_file(epoch: usize) -> String {
        format!("checkpoint_ep{}.json", epoch + 1)
    }

    pub fn before_eval_file(epoch: usize) -> String {
        format!("before_eval_checkpoint_ep{}.json", epoch + 1)
    }

    pub fn interrupt_file(epoch: usize) -> String {
        format!("interrupt_checkpoint_ep{}.json", epoch + 1)
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT_FILE)
    }

    /// Writes `checkpoint` as `file_name`, and also as the best copy when
    /// `is_best`. Returns the path of the primary file.
    pub fn save(&self, checkpoint: &Checkpoint, is_best: bool, file_name: &str) -> ReidResult<PathBuf> {
        let path = self.dir.join(file_name);
        let bytes = serde_json::to_vec(checkpoint)?;
        write_atomic(&path, &bytes)?;
        info!("Checkpoint saved to {}", path.display());

        if is_best {
            let best = self.best_path();
            write_atomic(&best, &bytes)?;
            info!("New best (score {:.4}, epoch {}) copied to {}", checkpoint.score, checkpoint.epoch + 1, best.display());
        }
        Ok(path)
    }

    /// Loads a checkpoint; any failure is fatal to the caller.
    pub fn load(path: &Path) -> ReidResult<Checkpoint> {
        let text = fs::read_to_string(path)
            .map_err(|e| ReidError::checkpoint(format!("cannot read: {e}"), path))?;
        serde_json::from_str(&text)
            .map_err(|e| ReidError::checkpoint(format!("malformed checkpoint: {e}"), path))
    }

    /// Best-effort load: a missing or malformed file is logged and skipped.
    pub fn try_load(path: &Path) -> Option<Checkpoint> {
        match CheckpointStore::load(path) {
            Ok(ckpt) => Some(ckpt),
            Err(e) => {
                warn!("Ignoring checkpoint: {e}");
                None
            }
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> ReidResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ReidError::checkpoint(format!("write failed: {e}"), path)
    })
}
