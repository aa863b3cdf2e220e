use std::time::Instant;

use tracing::info;

use crate::data::dataset::{split_labels, ReidDataset, Sample};
use crate::error::{ConfigError, ReidError, ReidResult};
use crate::loss::cross_entropy::{one_hot, CrossEntropyLoss};
use crate::math::matrix::Matrix;
use crate::metrics::accuracy::top_k_accuracy;
use crate::metrics::distance::{compute_distance_matrix, DistanceMatrix, DistanceMetric};
use crate::metrics::ranking::{evaluate, EvalOptions, RankingResult, SplitLabels};
use crate::network::model::ReidModel;
use crate::train::meter::AverageMeter;

/// Ranks reported after every retrieval evaluation.
pub const REPORTED_RANKS: [usize; 4] = [1, 5, 10, 20];

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub ranking: RankingResult,
    pub distmat: DistanceMatrix,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationReport {
    /// Top-1 rotation accuracy over query and gallery together.
    pub test_accuracy: f64,
    pub test_loss: f64,
    /// `None` when the dataset has no training samples.
    pub train_accuracy: Option<f64>,
}

/// Fails when the dataset's feature width differs from what `model` accepts.
pub fn check_input_dim<M: ReidModel + ?Sized>(model: &M, dataset: &ReidDataset) -> ReidResult<()> {
    let actual = dataset.feature_dim();
    if actual != model.input_dim() {
        return Err(ReidError::DimensionMismatch { expected: model.input_dim(), actual });
    }
    Ok(())
}

/// Eval-mode embeddings of `samples`, one row each, computed in chunks of
/// `batch_size`.
pub fn extract_features<M: ReidModel + ?Sized>(
    model: &M,
    samples: &[Sample],
    batch_size: usize,
) -> ReidResult<Matrix> {
    let mut batch_time = AverageMeter::new();
    let mut rows = Vec::with_capacity(samples.len());
    for chunk in samples.chunks(batch_size.max(1)) {
        let t = Instant::now();
        rows.extend(chunk.iter().map(|s| model.features(&s.features)));
        batch_time.update(t.elapsed().as_secs_f64(), chunk.len());
    }
    let dim = rows.first().map(|r| r.len()).unwrap_or(0);
    let features = Matrix::from_rows(rows, dim)?;
    tracing::debug!("feature extraction: {:.6}s per sample", batch_time.avg);
    Ok(features)
}

/// Extracts query and gallery features, builds the distance matrix and scores
/// it.
pub fn test_ranking<M: ReidModel + ?Sized>(
    model: &M,
    dataset: &ReidDataset,
    metric: DistanceMetric,
    options: &EvalOptions,
    test_batch: usize,
) -> ReidResult<EvalReport> {
    if dataset.query.is_empty() {
        return Err(ReidError::EmptyQuery);
    }
    if dataset.gallery.is_empty() {
        return Err(ReidError::EmptyGallery);
    }
    check_input_dim(model, dataset)?;

    let qf = extract_features(model, &dataset.query, test_batch)?;
    info!("Extracted features for query set, obtained {}-by-{} matrix", qf.rows, qf.cols);
    let gf = extract_features(model, &dataset.gallery, test_batch)?;
    info!("Extracted features for gallery set, obtained {}-by-{} matrix", gf.rows, gf.cols);

    let distmat = compute_distance_matrix(&qf, &gf, metric)?;
    info!("Computing CMC and mAP ({metric} distance)");

    let (q_pids, q_camids) = split_labels(&dataset.query);
    let (g_pids, g_camids) = split_labels(&dataset.gallery);
    let ranking = evaluate(
        &distmat,
        SplitLabels::new(&q_pids, &q_camids),
        SplitLabels::new(&g_pids, &g_camids),
        options,
    )?;

    log_ranking(&ranking);
    Ok(EvalReport { ranking, distmat })
}

pub fn log_ranking(ranking: &RankingResult) {
    info!("Results ----------");
    info!("mAP: {:.1}%", ranking.map * 100.0);
    info!("CMC curve");
    for r in REPORTED_RANKS {
        if let Some(v) = ranking.rank(r) {
            info!("Rank-{:<3}: {:.1}%", r, v * 100.0);
        }
    }
    info!("------------------");
}

/// Rotation-prediction accuracy on the test splits, plus train accuracy.
///
/// Fails with [`ReidError::EmptyQuery`] when query and gallery are both empty.
pub fn test_rotation<M: ReidModel + ?Sized>(model: &M, dataset: &ReidDataset) -> ReidResult<RotationReport> {
    let test: Vec<&Sample> = dataset.query.iter().chain(&dataset.gallery).collect();
    if test.is_empty() {
        return Err(ReidError::EmptyQuery);
    }
    check_input_dim(model, dataset)?;

    let (test_accuracy, test_loss) = rotation_scores(model, &test)?;
    let train_accuracy = if dataset.train.is_empty() {
        None
    } else {
        let train: Vec<&Sample> = dataset.train.iter().collect();
        Some(rotation_scores(model, &train)?.0)
    };

    info!("Rotation results ----------");
    info!("test loss: {:.4}", test_loss);
    info!("test accuracy: {:.1}%", test_accuracy * 100.0);
    if let Some(acc) = train_accuracy {
        info!("train accuracy: {:.1}%", acc * 100.0);
    }

    Ok(RotationReport { test_accuracy, test_loss, train_accuracy })
}

/// Top-1 accuracy and mean loss over a non-empty `samples`.
fn rotation_scores<M: ReidModel + ?Sized>(model: &M, samples: &[&Sample]) -> ReidResult<(f64, f64)> {
    let mut logits = Vec::with_capacity(samples.len());
    let mut labels = Vec::with_capacity(samples.len());
    let mut loss = AverageMeter::new();

    for s in samples {
        let label = rotation_label(s)?;
        let out = model.rotation_logits(&s.features);
        if label >= out.len() {
            return Err(ReidError::LabelOutOfRange { label: label as i64, classes: out.len() });
        }
        loss.update(CrossEntropyLoss::loss(&out, &one_hot(label, out.len())), 1);
        logits.push(out);
        labels.push(label);
    }
    Ok((top_k_accuracy(&logits, &labels, 1), loss.avg))
}

pub(crate) fn rotation_label(sample: &Sample) -> ReidResult<usize> {
    sample.rotation.ok_or_else(|| {
        ConfigError::invalid_value("rotation_mode", "dataset sample has no rotation label").into()
    })
}
