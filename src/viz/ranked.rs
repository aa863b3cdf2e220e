/// Ranked-result strips for evaluation mode.
///
/// One PNG per query: the query tile followed by its `topk` nearest gallery
/// entries, framed green for a correct identity and red otherwise. Gallery
/// entries sharing identity and camera with the query are skipped, as they
/// are during scoring. Samples without an image path are drawn as a
/// grayscale rendering of their feature vector.
use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use tracing::info;

use crate::data::dataset::{ReidDataset, Sample};
use crate::error::{ReidError, ReidResult};
use crate::metrics::distance::DistanceMatrix;

pub const DEFAULT_TOPK: usize = 10;

const TILE_WIDTH: u32 = 64;
const TILE_HEIGHT: u32 = 128;
const BORDER: u32 = 4;
const GAP: u32 = 12;

const HIT: Rgb<u8> = Rgb([0, 200, 0]);
const MISS: Rgb<u8> = Rgb([220, 0, 0]);
const NEUTRAL: Rgb<u8> = Rgb([0, 0, 0]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Writes one strip per query into `save_dir`. Returns the number of files.
pub fn visualize_ranked_results(
    distmat: &DistanceMatrix,
    dataset: &ReidDataset,
    save_dir: &Path,
    topk: usize,
) -> ReidResult<usize> {
    if distmat.num_query() != dataset.query.len() {
        return Err(ReidError::length_mismatch("query samples", distmat.num_query(), dataset.query.len()));
    }
    if distmat.num_gallery() != dataset.gallery.len() {
        return Err(ReidError::length_mismatch("gallery samples", distmat.num_gallery(), dataset.gallery.len()));
    }
    fs::create_dir_all(save_dir)?;
    info!("Visualizing top-{} ranks in {}", topk, save_dir.display());

    (0..distmat.num_query()).into_par_iter().try_for_each(|qi| {
        let query = &dataset.query[qi];
        let row = distmat.row(qi);
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));

        let ranked: Vec<(&Sample, bool)> = order.into_iter()
            .map(|j| &dataset.gallery[j])
            .filter(|g| !(g.pid == query.pid && g.camid == query.camid))
            .take(topk)
            .map(|g| (g, g.pid == query.pid))
            .collect();

        let strip = render_strip(query, &ranked, topk)?;
        let name = format!("query{:04}_pid{}_cam{}.png", qi, query.pid, query.camid);
        strip.save(save_dir.join(name))?;
        Ok::<(), ReidError>(())
    })?;

    Ok(distmat.num_query())
}

fn render_strip(query: &Sample, ranked: &[(&Sample, bool)], topk: usize) -> ReidResult<RgbImage> {
    let cell_w = TILE_WIDTH + 2 * BORDER;
    let cell_h = TILE_HEIGHT + 2 * BORDER;
    let width = cell_w * (topk as u32 + 1) + GAP;
    let mut canvas = RgbImage::from_pixel(width, cell_h, BACKGROUND);

    imageops::overlay(&mut canvas, &framed(&render_tile(query)?, NEUTRAL), 0, 0);
    for (rank, (sample, hit)) in ranked.iter().enumerate() {
        let color = if *hit { HIT } else { MISS };
        let x = cell_w * (rank as u32 + 1) + GAP;
        imageops::overlay(&mut canvas, &framed(&render_tile(sample)?, color), x as i64, 0);
    }
    Ok(canvas)
}

fn render_tile(sample: &Sample) -> ReidResult<RgbImage> {
    match &sample.image {
        Some(path) => {
            let img = image::open(path)?;
            Ok(img.resize_exact(TILE_WIDTH, TILE_HEIGHT, FilterType::Lanczos3).to_rgb8())
        }
        None => Ok(feature_tile(&sample.features)),
    }
}

/// Min-max scaled features as horizontal gray bands, first feature on top.
fn feature_tile(features: &[f64]) -> RgbImage {
    let (lo, hi) = features.iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = if hi > lo { hi - lo } else { 1.0 };

    RgbImage::from_fn(TILE_WIDTH, TILE_HEIGHT, |_, y| {
        if features.is_empty() {
            return Rgb([128, 128, 128]);
        }
        let idx = (y as usize * features.len()) / TILE_HEIGHT as usize;
        let v = ((features[idx] - lo) / span * 255.0).round() as u8;
        Rgb([v, v, v])
    })
}

fn framed(tile: &RgbImage, color: Rgb<u8>) -> RgbImage {
    let mut cell = RgbImage::from_pixel(tile.width() + 2 * BORDER, tile.height() + 2 * BORDER, color);
    imageops::overlay(&mut cell, tile, BORDER as i64, BORDER as i64);
    cell
}
