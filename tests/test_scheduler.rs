//! End-to-end behavior of `train_loop` driven by a recording mock model.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use serde_json::json;
use tempfile::tempdir;

use ferrite_reid::data::synthetic::SyntheticConfig;
use ferrite_reid::error::{ReidError, ReidResult};
use ferrite_reid::network::model::{ModelOutput, OutputGrads, OutputHead, ParamScope, ReidModel};
use ferrite_reid::optim::sgd::Sgd;
use ferrite_reid::train::checkpoint::{Checkpoint, CheckpointStore, BEST_CHECKPOINT_FILE, SENTINEL_SCORE};
use ferrite_reid::train::evaluate::{test_ranking, test_rotation};
use ferrite_reid::train::phase::TrainingPhase;
use ferrite_reid::{train_loop, DistanceMetric, EmbeddingNet, EvalOptions, NetworkSpec, ReidDataset, TrainConfig};

const CLASSES: usize = 12;
const ROT_CLASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
struct StepRecord {
    scope: ParamScope,
    lr: f64,
    norm_frozen: bool,
}

/// Model with constant outputs that records every call the loop makes.
#[derive(Default)]
struct RecordingModel {
    has_classifier: bool,
    input_dim: usize,
    norm_frozen: bool,
    heads: Vec<OutputHead>,
    steps: Vec<StepRecord>,
    backward_calls: usize,
    strict_loads: Vec<bool>,
    raise_after_steps: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordingModel {
    fn new() -> Self {
        RecordingModel {
            has_classifier: true,
            input_dim: SyntheticConfig::default().feature_dim,
            ..Default::default()
        }
    }
}

impl ReidModel for RecordingModel {
    fn forward(&mut self, _input: &[f64], head: OutputHead) -> ModelOutput {
        self.heads.push(head);
        match head {
            OutputHead::Identity => ModelOutput { heads: vec![vec![0.0; CLASSES]], epsilon: Some(0.1) },
            OutputHead::Rotation => ModelOutput { heads: vec![vec![0.0; ROT_CLASSES]], epsilon: None },
        }
    }

    fn backward(&mut self, _grads: &OutputGrads) {
        self.backward_calls += 1;
    }

    fn step(&mut self, scope: ParamScope, optimizer: &Sgd, _batch_len: usize) {
        self.steps.push(StepRecord { scope, lr: optimizer.learning_rate, norm_frozen: self.norm_frozen });
        if let Some((n, flag)) = &self.raise_after_steps {
            if self.steps.len() == *n {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn features(&self, input: &[f64]) -> Vec<f64> {
        input.to_vec()
    }

    fn rotation_logits(&self, _input: &[f64]) -> Vec<f64> {
        vec![0.0; ROT_CLASSES]
    }

    fn has_classifier(&self) -> bool {
        self.has_classifier
    }

    fn set_norm_frozen(&mut self, frozen: bool) {
        self.norm_frozen = frozen;
    }

    fn num_params(&self) -> usize {
        0
    }

    fn state(&self) -> ReidResult<serde_json::Value> {
        Ok(json!({ "steps": self.steps.len() }))
    }

    fn load_state(&mut self, _state: &serde_json::Value, strict: bool) -> ReidResult<usize> {
        self.strict_loads.push(strict);
        Ok(1)
    }
}

fn dataset() -> ReidDataset {
    ReidDataset::synthetic(&SyntheticConfig::default())
}

/// 108 train samples in batches of 36: three steps per epoch.
fn config(dir: &Path, max_epoch: usize) -> TrainConfig {
    TrainConfig {
        max_epoch,
        train_batch: 36,
        test_batch: 10,
        lr: 0.01,
        fixbase_lr: 0.5,
        save_dir: dir.to_path_buf(),
        ..TrainConfig::default()
    }
}

fn exists(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

#[test]
fn phases_switch_on_epoch_thresholds() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { fixbase_epoch: 2, initial_train: 4, ..config(dir.path(), 6) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    let phases: Vec<TrainingPhase> = summary.history.iter().map(|s| s.phase).collect();
    assert_eq!(phases, vec![
        TrainingPhase::FixedBaseWarmup,
        TrainingPhase::FixedBaseWarmup,
        TrainingPhase::InitialCrossEntropy,
        TrainingPhase::InitialCrossEntropy,
        TrainingPhase::AdaptiveSmoothing,
        TrainingPhase::AdaptiveSmoothing,
    ]);
    assert_eq!(summary.history[0].criterion, "cross_entropy");
    assert_eq!(summary.history[5].criterion, "adaptive_label_smooth");
    assert!(summary.history[5].mean_epsilon.is_some());

    assert_eq!(model.steps.len(), 18);
    assert!(model.steps[..6].iter().all(|s| s.scope == ParamScope::Classifier && s.lr == 0.5));
    assert!(model.steps[6..].iter().all(|s| s.scope == ParamScope::All && s.lr == 0.01));
    assert!(model.heads.iter().all(|&h| h == OutputHead::Identity));
    assert_eq!(model.backward_calls, 18 * 36);
}

#[test]
fn fixbase_is_skipped_without_classifier() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { fixbase_epoch: 2, ..config(dir.path(), 3) };
    let mut model = RecordingModel { has_classifier: false, ..RecordingModel::new() };

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    assert!(summary.history.iter().all(|s| s.phase != TrainingPhase::FixedBaseWarmup));
    assert!(model.steps.iter().all(|s| s.scope == ParamScope::All));
}

#[test]
fn evaluation_and_checkpoints_follow_schedule() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { eval_step: 2, start_eval: 0, ..config(dir.path(), 5) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    let evaluated: Vec<usize> = summary.history.iter()
        .filter(|s| s.eval.is_some())
        .map(|s| s.epoch)
        .collect();
    assert_eq!(evaluated, vec![2, 4, 5]);

    for name in ["checkpoint_ep2.json", "checkpoint_ep4.json", "checkpoint_ep5.json", "best_model.json"] {
        assert!(exists(dir.path(), name), "{name} missing");
    }
    assert!(!exists(dir.path(), "checkpoint_ep1.json"));
    assert!(!exists(dir.path(), "checkpoint_ep3.json"));

    let before = CheckpointStore::load(&dir.path().join("before_eval_checkpoint_ep5.json")).unwrap();
    assert_eq!(before.score, SENTINEL_SCORE);
    assert_eq!(before.epoch, 4);

    // constant features give the same score each time: only the first is best
    let best_flags: Vec<bool> = summary.history.iter().filter_map(|s| s.eval.as_ref()).map(|e| e.is_best).collect();
    assert_eq!(best_flags, vec![true, false, false]);
    assert_eq!(summary.best_epoch, Some(2));
}

#[test]
fn interrupt_flushes_checkpoint_and_returns_error() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let cfg = TrainConfig { stop_flag: Some(Arc::clone(&flag)), ..config(dir.path(), 10) };
    let mut model = RecordingModel { raise_after_steps: Some((4, flag)), ..RecordingModel::new() };

    let err = train_loop(&mut model, &dataset(), &cfg, &store).unwrap_err();

    // raised during the second epoch's first step; observed before its second batch
    assert!(matches!(err, ReidError::Interrupted { epoch: 1 }));
    assert_eq!(model.steps.len(), 4);
    let ckpt = CheckpointStore::load(&dir.path().join("interrupt_checkpoint_ep2.json")).unwrap();
    assert_eq!(ckpt.score, SENTINEL_SCORE);
    assert_eq!(ckpt.epoch, 1);
    assert_eq!(ckpt.model_state, json!({ "steps": 4 }));
}

#[test]
fn interrupt_before_first_batch_still_checkpoints() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { stop_flag: Some(Arc::new(AtomicBool::new(true))), ..config(dir.path(), 3) };
    let mut model = RecordingModel::new();

    let err = train_loop(&mut model, &dataset(), &cfg, &store).unwrap_err();
    assert!(matches!(err, ReidError::Interrupted { epoch: 0 }));
    assert!(model.steps.is_empty());
    assert!(exists(dir.path(), "interrupt_checkpoint_ep1.json"));
}

#[test]
fn rotation_mode_trains_rotation_head_only() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let data = ReidDataset::synthetic(&SyntheticConfig {
        num_rot_classes: Some(ROT_CLASSES),
        ..SyntheticConfig::default()
    });
    let cfg = TrainConfig { rotation_mode: true, fixbase_epoch: 1, ..config(dir.path(), 2) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &data, &cfg, &store).unwrap();

    assert!(summary.history.iter().all(|s| s.phase == TrainingPhase::RotationSelfSupervision));
    assert!(model.steps.iter().all(|s| s.scope == ParamScope::RotationHead && s.norm_frozen));
    assert!(model.heads.iter().all(|&h| h == OutputHead::Rotation));
    let eval = summary.history[1].eval.as_ref().unwrap();
    assert!(eval.score >= 0.0 && eval.score <= 1.0);
    assert!(eval.map.is_none());
}

#[test]
fn resume_continues_after_checkpoint_epoch() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let saved = Checkpoint { model_state: json!({}), epoch: 2, score: 2.0 };
    let path = store.save(&saved, false, "resume.json").unwrap();
    let cfg = TrainConfig { resume: Some(path), ..config(dir.path(), 5) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    assert_eq!(model.strict_loads, vec![true]);
    let epochs: Vec<usize> = summary.history.iter().map(|s| s.epoch).collect();
    assert_eq!(epochs, vec![4, 5]);
    // a rank-1 cannot exceed the resumed score of 2.0
    assert!(!summary.history[1].eval.as_ref().unwrap().is_best);
    assert_eq!(summary.best_epoch, Some(3));
    assert!(!exists(dir.path(), "best_model.json"));
}

#[test]
fn resume_from_missing_file_is_fatal() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { resume: Some(dir.path().join("absent.json")), ..config(dir.path(), 2) };
    let mut model = RecordingModel::new();

    let err = train_loop(&mut model, &dataset(), &cfg, &store).unwrap_err();
    assert!(matches!(err, ReidError::Checkpoint { .. }));
    assert!(model.steps.is_empty());
}

#[test]
fn missing_pretrained_weights_only_warn() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { load_weights: Some(dir.path().join("absent.json")), ..config(dir.path(), 1) };
    let mut model = RecordingModel::new();

    train_loop(&mut model, &dataset(), &cfg, &store).unwrap();
    assert!(model.strict_loads.is_empty());
}

#[test]
fn learning_rate_decays_at_milestones() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { lr_schedule: true, stepsize: vec![2], gamma: 0.1, ..config(dir.path(), 4) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    let lrs: Vec<f64> = summary.history.iter().map(|s| s.learning_rate).collect();
    let expected = [0.01, 0.01, 0.001, 0.001];
    for (got, want) in lrs.iter().zip(expected) {
        assert!((got - want).abs() < 1e-12, "{got} != {want}");
    }
}

#[test]
fn lambda_scales_reported_loss() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let cfg = TrainConfig { lambda_xent: 0.5, ..config(dir.path(), 1) };
    let mut model = RecordingModel::new();

    let summary = train_loop(&mut model, &dataset(), &cfg, &store).unwrap();

    let stats = &summary.history[0];
    assert!((stats.xent_loss - (CLASSES as f64).ln()).abs() < 1e-9);
    assert!((stats.train_loss - 0.5 * stats.xent_loss).abs() < 1e-9);
}

#[test]
fn progress_channel_receives_every_epoch() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (tx, rx) = mpsc::channel();
    let cfg = TrainConfig { progress_tx: Some(tx), ..config(dir.path(), 3) };
    let mut model = RecordingModel::new();

    train_loop(&mut model, &dataset(), &cfg, &store).unwrap();
    drop(cfg);

    let epochs: Vec<usize> = rx.iter().map(|s| s.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3]);
}

fn rotation_dataset() -> ReidDataset {
    ReidDataset::synthetic(&SyntheticConfig {
        num_rot_classes: Some(ROT_CLASSES),
        ..SyntheticConfig::default()
    })
}

#[test]
fn rotation_eval_without_test_samples_is_fatal() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let mut data = rotation_dataset();
    data.query.clear();
    data.gallery.clear();
    let cfg = TrainConfig { rotation_mode: true, ..config(dir.path(), 1) };
    let mut model = RecordingModel::new();

    let err = train_loop(&mut model, &data, &cfg, &store).unwrap_err();

    assert!(matches!(err, ReidError::EmptyQuery));
    assert!(!exists(dir.path(), BEST_CHECKPOINT_FILE));
}

#[test]
fn rotation_eval_skips_train_accuracy_without_train_samples() {
    let mut data = rotation_dataset();
    data.train.clear();

    let report = test_rotation(&RecordingModel::new(), &data).unwrap();

    assert!(report.train_accuracy.is_none());
    assert!(report.test_accuracy >= 0.0 && report.test_accuracy <= 1.0);
}

#[test]
fn ranking_eval_names_the_empty_split() {
    let model = RecordingModel::new();
    let opts = EvalOptions::default();

    let mut no_gallery = dataset();
    no_gallery.gallery.clear();
    let err = test_ranking(&model, &no_gallery, DistanceMetric::SquaredEuclidean, &opts, 10).unwrap_err();
    assert!(matches!(err, ReidError::EmptyGallery));

    let mut no_query = dataset();
    no_query.query.clear();
    let err = test_ranking(&model, &no_query, DistanceMetric::SquaredEuclidean, &opts, 10).unwrap_err();
    assert!(matches!(err, ReidError::EmptyQuery));
}

#[test]
fn model_input_width_must_match_dataset_before_training() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    let mut model = RecordingModel { input_dim: 19, ..RecordingModel::new() };

    let err = train_loop(&mut model, &dataset(), &config(dir.path(), 2), &store).unwrap_err();

    assert!(matches!(err, ReidError::DimensionMismatch { expected: 19, actual: 16 }));
    assert!(model.steps.is_empty());
}

#[test]
fn network_with_wrong_input_width_is_rejected_by_evaluation() {
    let data = dataset();
    let spec = NetworkSpec::new(data.feature_dim() + 3, 8, data.num_train_pids);
    let net = EmbeddingNet::new(spec, 1).unwrap();

    let err = test_ranking(&net, &data, DistanceMetric::Cosine, &EvalOptions::default(), 10).unwrap_err();

    let expected = data.feature_dim() + 3;
    assert!(matches!(err, ReidError::DimensionMismatch { expected: e, actual: 16 } if e == expected));
}
