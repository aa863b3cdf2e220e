use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::data::dataset::ReidDataset;
use crate::error::{ReidError, ReidResult};
use crate::loss::criterion::Criterion;
use crate::network::model::{OutputHead, ReidModel};
use crate::optim::schedule::MultiStepLr;
use crate::optim::sgd::Sgd;
use crate::train::checkpoint::{BestRecord, CheckpointManager, CheckpointStore};
use crate::train::epoch_stats::{EpochStats, EvalRecord};
use crate::train::evaluate::{check_input_dim, rotation_label, test_ranking, test_rotation};
use crate::train::meter::AverageMeter;
use crate::train::phase::{PhaseSchedule, TrainingPhase};
use crate::train::train_config::TrainConfig;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// What a completed run leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSummary {
    pub best_score: Option<f64>,
    /// 1-based epoch of the best evaluation.
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochStats>,
    pub elapsed_ms: u64,
    pub train_ms: u64,
}

/// Trains `model` on `dataset.train` from `config.start_epoch` (or the resumed
/// checkpoint) up to `config.max_epoch`, evaluating and checkpointing into
/// `store` on the configured schedule.
///
/// # Phases
/// Each epoch runs in exactly one [`TrainingPhase`], chosen from its index:
/// fixed-base warm-up (classifier only, separate optimizer at `fixbase_lr`),
/// then plain/label-smoothed cross-entropy, then adaptive smoothing. In
/// rotation mode every epoch trains the rotation head instead.
///
/// # Checkpoints
/// - `checkpoint_ep{N}.json` after every evaluation, plus `best_model.json`
///   on strict improvement.
/// - `before_eval_checkpoint_ep{N}.json` before the final evaluation, so a
///   failing evaluation cannot lose the trained weights.
/// - `interrupt_checkpoint_ep{N}.json` when `config.stop_flag` is raised;
///   the function then returns [`ReidError::Interrupted`].
pub fn train_loop<M: ReidModel>(
    model: &mut M,
    dataset: &ReidDataset,
    config: &TrainConfig,
    store: &CheckpointStore,
) -> ReidResult<TrainSummary> {
    config.validate()?;
    dataset.validate()?;
    check_input_dim(model, dataset)?;
    let run_start = Instant::now();

    let mut schedule = PhaseSchedule::from_config(config);
    if schedule.fixbase_epoch > 0 && !config.rotation_mode && !model.has_classifier() {
        warn!("fixbase_epoch > 0 but the model has no classifier; skipping the fixed-base phase");
        schedule.fixbase_epoch = 0;
    }

    if let Some(path) = &config.load_weights {
        if let Some(ckpt) = CheckpointStore::try_load(path) {
            match model.load_state(&ckpt.model_state, false) {
                Ok(n) => info!("Loaded {} tensors from {}", n, path.display()),
                Err(e) => warn!("Ignoring pretrained weights {}: {e}", path.display()),
            }
        }
    }

    let mut manager = CheckpointManager::new();
    let mut start_epoch = config.start_epoch;
    if let Some(path) = &config.resume {
        let ckpt = CheckpointStore::load(path)?;
        model.load_state(&ckpt.model_state, true)
            .map_err(|e| ReidError::checkpoint(format!("cannot restore model: {e}"), path))?;
        start_epoch = ckpt.epoch + 1;
        manager = CheckpointManager::resume_from(BestRecord { score: ckpt.score, epoch: Some(ckpt.epoch) });
        info!("Resumed from {} (epoch {}, score {:.4})", path.display(), start_epoch, ckpt.score);
        if start_epoch >= config.max_epoch {
            warn!("Checkpoint already covers all {} epochs; nothing to train", config.max_epoch);
        }
    }

    let base_lr = if config.rotation_mode { config.fixbase_lr } else { config.lr };
    let mut optimizer = Sgd::new(base_lr).with_weight_decay(config.weight_decay);
    let fixbase_optimizer = Sgd::new(config.fixbase_lr).with_weight_decay(config.weight_decay);
    let mut lr_schedule = config.lr_schedule
        .then(|| MultiStepLr::new(base_lr, config.stepsize.clone(), config.gamma));
    if let Some(s) = lr_schedule.as_mut() {
        s.fast_forward(start_epoch, &mut optimizer);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = Vec::new();
    let mut train_time = Duration::ZERO;

    info!("==> Start training");
    for epoch in start_epoch..config.max_epoch {
        if config.is_cancelled() {
            return Err(interrupt(model, store, epoch)?);
        }

        let phase = schedule.phase_for(epoch);
        if epoch == start_epoch || phase != schedule.phase_for(epoch.saturating_sub(1)) {
            info!("==> Entering {} phase at epoch {}", phase, epoch + 1);
        }
        model.set_norm_frozen(schedule.norm_frozen(phase));
        let criterion = Criterion::for_phase(phase, config.use_sigmoid, config.label_smooth);
        let active = match phase {
            TrainingPhase::FixedBaseWarmup => &fixbase_optimizer,
            _ => &optimizer,
        };
        let learning_rate = active.learning_rate;

        let t_start = Instant::now();
        let batches = dataset.train_batches(config.train_batch, &mut rng);
        let outcome = run_one_epoch(model, dataset, &batches, EpochPlan {
            epoch,
            phase,
            criterion,
            optimizer: active,
        }, config)?;
        let Some(outcome) = outcome else {
            return Err(interrupt(model, store, epoch)?);
        };
        train_time += t_start.elapsed();

        if let Some(s) = lr_schedule.as_mut() {
            let lr = s.step(&mut optimizer);
            debug!("learning rate now {lr}");
        }

        let eval = if schedule.should_evaluate(epoch) {
            if schedule.is_final(epoch) {
                let ckpt = CheckpointManager::sentinel(epoch, model.state()?);
                store.save(&ckpt, false, &CheckpointStore::before_eval_file(epoch))?;
            }
            Some(evaluate_epoch(model, dataset, config, &mut manager, store, epoch)?)
        } else {
            None
        };

        let stats = EpochStats {
            epoch: epoch + 1,
            total_epochs: config.max_epoch,
            phase,
            criterion: criterion.name().to_string(),
            train_loss: outcome.loss,
            xent_loss: outcome.xent,
            mean_epsilon: outcome.epsilon,
            learning_rate,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
            eval,
        };
        if let Some(ref tx) = config.progress_tx {
            if tx.send(stats.clone()).is_err() {
                debug!("progress receiver dropped");
            }
        }
        history.push(stats);

        if config.is_cancelled() && epoch + 1 < config.max_epoch {
            return Err(interrupt(model, store, epoch)?);
        }
    }

    let best = manager.best();
    if let Some(best_epoch) = best.epoch {
        info!("==> Best score {:.1}%, achieved at epoch {}", best.score * 100.0, best_epoch + 1);
    }
    let elapsed = run_start.elapsed();
    info!("Finished. Total elapsed time: {:.1}s. Training time: {:.1}s", elapsed.as_secs_f64(), train_time.as_secs_f64());

    Ok(TrainSummary {
        best_score: best.epoch.map(|_| best.score),
        best_epoch: best.epoch.map(|e| e + 1),
        history,
        elapsed_ms: elapsed.as_millis() as u64,
        train_ms: train_time.as_millis() as u64,
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

struct EpochPlan<'a> {
    epoch: usize,
    phase: TrainingPhase,
    criterion: Criterion,
    optimizer: &'a Sgd,
}

struct EpochOutcome {
    loss: f64,
    xent: f64,
    epsilon: Option<f64>,
}

/// One pass of mini-batch SGD. Returns `None` if cancellation was observed
/// at a batch boundary.
fn run_one_epoch<M: ReidModel>(
    model: &mut M,
    dataset: &ReidDataset,
    batches: &[Vec<usize>],
    plan: EpochPlan<'_>,
    config: &TrainConfig,
) -> ReidResult<Option<EpochOutcome>> {
    let head = plan.phase.head();
    let scope = plan.phase.scope();
    // rotation targets are not identities; lambda_xent weights identity loss only
    let lambda = if head == OutputHead::Identity { config.lambda_xent } else { 1.0 };

    let mut batch_time = AverageMeter::new();
    let mut losses = AverageMeter::new();
    let mut xent = AverageMeter::new();
    let mut epsilon = AverageMeter::new();

    if batches.is_empty() {
        warn!("epoch {}: train split smaller than one batch, no update", plan.epoch + 1);
    }

    for (batch_idx, batch) in batches.iter().enumerate() {
        if config.is_cancelled() {
            return Ok(None);
        }
        let t = Instant::now();
        let mut loss_sum = 0.0;
        let mut xent_sum = 0.0;

        for &idx in batch {
            let sample = &dataset.train[idx];
            let label = match head {
                OutputHead::Identity => sample.pid as usize,
                OutputHead::Rotation => rotation_label(sample)?,
            };
            let output = model.forward(&sample.features, head);
            let eval = plan.criterion.evaluate(&output, label)?;
            xent_sum += eval.loss;
            let eval = eval.scaled(lambda);
            loss_sum += eval.loss;
            if let Some(e) = output.epsilon.filter(|_| head == OutputHead::Identity) {
                epsilon.update(e, 1);
            }
            model.backward(&eval.grads);
        }
        model.step(scope, plan.optimizer, batch.len());

        let n = batch.len();
        losses.update(loss_sum / n as f64, n);
        xent.update(xent_sum / n as f64, n);
        batch_time.update(t.elapsed().as_secs_f64(), 1);

        if (batch_idx + 1) % config.print_freq == 0 {
            let eps = if epsilon.count > 0 {
                format!("\tEpsilon {:.4}", epsilon.avg)
            } else {
                String::new()
            };
            info!(
                "Epoch: [{}][{}/{}]\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4}){}",
                plan.epoch + 1,
                batch_idx + 1,
                batches.len(),
                batch_time.val,
                batch_time.avg,
                losses.val,
                losses.avg,
                eps,
            );
        }
    }

    Ok(Some(EpochOutcome {
        loss: losses.avg,
        xent: xent.avg,
        epsilon: (epsilon.count > 0).then_some(epsilon.avg),
    }))
}

fn evaluate_epoch<M: ReidModel>(
    model: &M,
    dataset: &ReidDataset,
    config: &TrainConfig,
    manager: &mut CheckpointManager,
    store: &CheckpointStore,
    epoch: usize,
) -> ReidResult<EvalRecord> {
    info!("==> Test");
    let (score, map, rank5) = if config.rotation_mode {
        let report = test_rotation(model, dataset)?;
        (report.test_accuracy, None, None)
    } else {
        let report = test_ranking(model, dataset, config.metric, &config.eval_options(), config.test_batch)?;
        (report.ranking.rank1(), Some(report.ranking.map), report.ranking.rank(5))
    };

    let decision = manager.record(score, epoch, model.state()?);
    store.save(&decision.checkpoint, decision.is_best, &CheckpointStore::epoch_file(epoch))?;
    Ok(EvalRecord { score, map, rank5, is_best: decision.is_best })
}

/// Flushes the emergency checkpoint for `epoch` and builds the error the
/// caller returns.
fn interrupt<M: ReidModel>(model: &M, store: &CheckpointStore, epoch: usize) -> ReidResult<ReidError> {
    let ckpt = CheckpointManager::sentinel(epoch, model.state()?);
    let path: PathBuf = store.save(&ckpt, false, &CheckpointStore::interrupt_file(epoch))?;
    warn!("Training interrupted at epoch {}; state saved to {}", epoch + 1, path.display());
    Ok(ReidError::Interrupted { epoch })
}
