//! Angular margin diagnostic for cosine-distance evaluations.
//!
//! For each query, `theta_pos` is the angle to the closest correct gallery
//! entry and `theta_neg` the angle to the `min_rank`-th closest impostor,
//! both in degrees. `delta = theta_neg - theta_pos` is positive when the
//! query is separated from impostors.

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::data::dataset::{split_labels, ReidDataset};
use crate::error::{ReidError, ReidResult};
use crate::metrics::distance::DistanceMatrix;
use crate::metrics::ranking::{ranked_gallery, SplitLabels};

pub const DELTA_THETA_FILE: &str = "delta_theta.json";
pub const HISTOGRAM_FILE: &str = "delta_theta_hist.png";

const HIST_BINS: usize = 36;
const BAR_WIDTH: u32 = 10;
const HIST_HEIGHT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaTheta {
    pub query: usize,
    pub pid: i64,
    pub theta_pos: f64,
    pub theta_neg: f64,
    pub delta: f64,
}

/// Converts a cosine distance `1 - cos` back into an angle in degrees.
pub fn distance_to_degrees(d: f64) -> f64 {
    (1.0 - d).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Per-query angular margins from a cosine distance matrix. Queries lacking a
/// correct match or `min_rank` impostors are skipped.
pub fn compute_delta_theta(
    distmat: &DistanceMatrix,
    query: SplitLabels<'_>,
    gallery: SplitLabels<'_>,
    min_rank: usize,
) -> ReidResult<Vec<DeltaTheta>> {
    if query.len() != distmat.num_query() {
        return Err(ReidError::length_mismatch("query pids", distmat.num_query(), query.len()));
    }
    if gallery.len() != distmat.num_gallery() {
        return Err(ReidError::length_mismatch("gallery pids", distmat.num_gallery(), gallery.len()));
    }
    let min_rank = min_rank.max(1);

    let records = (0..distmat.num_query())
        .filter_map(|qi| {
            let (q_pid, q_camid) = (query.pids[qi], query.camids[qi]);
            let row = distmat.row(qi);
            let order = ranked_gallery(row, q_pid, q_camid, &gallery);

            let pos = order.iter().find(|&&j| gallery.pids[j] == q_pid)?;
            let neg = order.iter().filter(|&&j| gallery.pids[j] != q_pid).nth(min_rank - 1)?;
            let theta_pos = distance_to_degrees(row[*pos]);
            let theta_neg = distance_to_degrees(row[*neg]);
            Some(DeltaTheta { query: qi, pid: q_pid, theta_pos, theta_neg, delta: theta_neg - theta_pos })
        })
        .collect();
    Ok(records)
}

/// Computes the margins for `dataset` and writes them, with a histogram, into
/// `save_dir`.
pub fn plot_delta_theta(
    distmat: &DistanceMatrix,
    dataset: &ReidDataset,
    save_dir: &Path,
    min_rank: usize,
) -> ReidResult<Vec<DeltaTheta>> {
    let (q_pids, q_camids) = split_labels(&dataset.query);
    let (g_pids, g_camids) = split_labels(&dataset.gallery);
    let records = compute_delta_theta(
        distmat,
        SplitLabels::new(&q_pids, &q_camids),
        SplitLabels::new(&g_pids, &g_camids),
        min_rank,
    )?;

    fs::create_dir_all(save_dir)?;
    fs::write(save_dir.join(DELTA_THETA_FILE), serde_json::to_string_pretty(&records)?)?;
    let deltas: Vec<f64> = records.iter().map(|r| r.delta).collect();
    histogram(&deltas).save(save_dir.join(HISTOGRAM_FILE))?;

    let mean = if deltas.is_empty() { 0.0 } else { deltas.iter().sum::<f64>() / deltas.len() as f64 };
    info!("Delta theta over {} queries: mean {:.2} deg, written to {}", records.len(), mean, save_dir.display());
    Ok(records)
}

/// Bar chart of `values` in equal-width bins; a red column marks zero when it
/// falls inside the range.
fn histogram(values: &[f64]) -> RgbImage {
    let width = BAR_WIDTH * HIST_BINS as u32;
    let mut img = RgbImage::from_pixel(width, HIST_HEIGHT, Rgb([255, 255, 255]));
    if values.is_empty() {
        return img;
    }

    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };
    let bin_of = |v: f64| (((v - lo) / span) * HIST_BINS as f64).floor().clamp(0.0, (HIST_BINS - 1) as f64) as usize;

    let mut counts = [0usize; HIST_BINS];
    for &v in values {
        counts[bin_of(v)] += 1;
    }
    let peak = counts.iter().copied().max().unwrap_or(1).max(1);

    for (b, &c) in counts.iter().enumerate() {
        let bar = (c as f64 / peak as f64 * (HIST_HEIGHT - 1) as f64).round() as u32;
        for x in b as u32 * BAR_WIDTH..(b as u32 + 1) * BAR_WIDTH - 1 {
            for y in HIST_HEIGHT - bar..HIST_HEIGHT {
                img.put_pixel(x, y, Rgb([40, 90, 200]));
            }
        }
    }

    if lo < 0.0 && hi > 0.0 {
        let x = ((-lo / span) * width as f64).min((width - 1) as f64) as u32;
        for y in 0..HIST_HEIGHT {
            img.put_pixel(x, y, Rgb([220, 0, 0]));
        }
    }
    img
}
