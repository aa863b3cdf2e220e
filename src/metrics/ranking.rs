//! Retrieval ranking evaluation: CMC curve and mean average precision.
//!
//! For every query the gallery is sorted by ascending distance (stable, so
//! ties keep gallery order). Junk entries and entries sharing both identity
//! and camera with the query are then removed entirely: they neither count as
//! hits nor occupy a rank. What remains is a boolean hit sequence from which
//! the per-query CMC (cumulative max) and average precision are computed.
//!
//! Queries with no hit left are dropped and do not dilute the averages. If
//! every query is dropped the evaluation fails rather than reporting zero.
//!
//! The CUHK03 protocol repeats scoring on a random subsample of the ranked
//! gallery that keeps one entry per (identity, camera) group, and averages the
//! repeats. Randomness is derived from a seed and the (repeat, query) pair so
//! results do not depend on thread scheduling.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::{ReidError, ReidResult};
use crate::metrics::distance::DistanceMatrix;

/// Identity label marking a distractor that is never a valid match.
pub const JUNK_PID: i64 = -1;

/// Number of resampling rounds in the CUHK03 protocol.
pub const CUHK03_REPEATS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalProtocol {
    #[default]
    Standard,
    Cuhk03 { repeats: usize, seed: u64 },
}

impl EvalProtocol {
    pub fn cuhk03(seed: u64) -> EvalProtocol {
        EvalProtocol::Cuhk03 { repeats: CUHK03_REPEATS, seed }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalOptions {
    pub protocol: EvalProtocol,
    /// Optional cap on the CMC length.
    pub max_rank: Option<usize>,
}

/// Identity and camera labels of one split, index-aligned with the rows (or
/// columns) of the distance matrix.
#[derive(Debug, Clone, Copy)]
pub struct SplitLabels<'a> {
    pub pids: &'a [i64],
    pub camids: &'a [i64],
}

impl<'a> SplitLabels<'a> {
    pub fn new(pids: &'a [i64], camids: &'a [i64]) -> Self {
        SplitLabels { pids, camids }
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    /// `cmc[k]` is the fraction of scored queries whose first hit lies within
    /// the top `k + 1` ranks.
    pub cmc: Vec<f64>,
    pub map: f64,
    pub num_valid_queries: usize,
}

impl RankingResult {
    pub fn rank1(&self) -> f64 {
        self.cmc.first().copied().unwrap_or(0.0)
    }

    /// CMC value at 1-based rank `k`, if the curve is that long.
    pub fn rank(&self, k: usize) -> Option<f64> {
        k.checked_sub(1).and_then(|i| self.cmc.get(i).copied())
    }
}

/// One gallery entry that survived exclusion, in rank order.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    pid: i64,
    camid: i64,
    hit: bool,
}

#[derive(Debug, Clone)]
struct QueryScore {
    cmc: Vec<f64>,
    ap: f64,
}

/// Evaluates a distance matrix under the selected protocol.
pub fn evaluate(
    distmat: &DistanceMatrix,
    query: SplitLabels<'_>,
    gallery: SplitLabels<'_>,
    options: &EvalOptions,
) -> ReidResult<RankingResult> {
    validate_inputs(distmat, &query, &gallery)?;

    let ranked: Vec<Vec<Candidate>> = (0..distmat.num_query())
        .into_par_iter()
        .map(|i| ranked_candidates(distmat.row(i), query.pids[i], query.camids[i], &gallery))
        .collect();

    let result = match options.protocol {
        EvalProtocol::Standard => {
            let scores: Vec<Option<QueryScore>> = ranked.par_iter()
                .map(|cands| score_query(cands.iter().map(|c| c.hit)))
                .collect();
            aggregate(scores, options.max_rank)?
        }
        EvalProtocol::Cuhk03 { repeats, seed } => {
            evaluate_cuhk03(&ranked, repeats.max(1), seed, options.max_rank)?
        }
    };

    debug!(
        valid = result.num_valid_queries,
        total = distmat.num_query(),
        map = result.map,
        "ranking evaluated"
    );
    Ok(result)
}

fn validate_inputs(
    distmat: &DistanceMatrix,
    query: &SplitLabels<'_>,
    gallery: &SplitLabels<'_>,
) -> ReidResult<()> {
    let (m, n) = (distmat.num_query(), distmat.num_gallery());
    if m == 0 {
        return Err(ReidError::EmptyQuery);
    }
    if n == 0 {
        return Err(ReidError::EmptyGallery);
    }
    for (what, len, expected) in [
        ("query pids", query.pids.len(), m),
        ("query camids", query.camids.len(), m),
        ("gallery pids", gallery.pids.len(), n),
        ("gallery camids", gallery.camids.len(), n),
    ] {
        if len != expected {
            return Err(ReidError::length_mismatch(what, expected, len));
        }
    }
    Ok(())
}

/// Gallery indices sorted by ascending distance, with junk and same
/// identity-and-camera entries removed.
pub(crate) fn ranked_gallery(row: &[f64], q_pid: i64, q_camid: i64, gallery: &SplitLabels<'_>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..gallery.len()).collect();
    order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));
    order.retain(|&j| {
        let pid = gallery.pids[j];
        let same_view = pid == q_pid && gallery.camids[j] == q_camid;
        pid != JUNK_PID && !same_view
    });
    order
}

fn ranked_candidates(row: &[f64], q_pid: i64, q_camid: i64, gallery: &SplitLabels<'_>) -> Vec<Candidate> {
    ranked_gallery(row, q_pid, q_camid, gallery)
        .into_iter()
        .map(|j| Candidate {
            pid: gallery.pids[j],
            camid: gallery.camids[j],
            hit: gallery.pids[j] == q_pid,
        })
        .collect()
}

/// Per-query CMC and AP from a hit sequence; `None` when there is no hit.
fn score_query(hits: impl Iterator<Item = bool>) -> Option<QueryScore> {
    let mut cmc = Vec::new();
    let mut found = 0usize;
    let mut precision_sum = 0.0;

    for (r, hit) in hits.enumerate() {
        if hit {
            found += 1;
            precision_sum += found as f64 / (r + 1) as f64;
        }
        cmc.push(if found > 0 { 1.0 } else { 0.0 });
    }

    (found > 0).then(|| QueryScore { cmc, ap: precision_sum / found as f64 })
}

fn aggregate(scores: Vec<Option<QueryScore>>, max_rank: Option<usize>) -> ReidResult<RankingResult> {
    let total = scores.len();
    let valid: Vec<QueryScore> = scores.into_iter().flatten().collect();
    if valid.is_empty() {
        return Err(ReidError::NoValidQueries { total });
    }

    let mut len = valid.iter().map(|s| s.cmc.len()).min().unwrap_or(0);
    if let Some(cap) = max_rank {
        len = len.min(cap);
    }

    let n = valid.len() as f64;
    let cmc = (0..len)
        .map(|r| valid.iter().map(|s| s.cmc[r]).sum::<f64>() / n)
        .collect();
    let map = valid.iter().map(|s| s.ap).sum::<f64>() / n;

    Ok(RankingResult { cmc, map, num_valid_queries: valid.len() })
}

fn evaluate_cuhk03(
    ranked: &[Vec<Candidate>],
    repeats: usize,
    seed: u64,
    max_rank: Option<usize>,
) -> ReidResult<RankingResult> {
    let mut rounds = Vec::with_capacity(repeats);

    for repeat in 0..repeats {
        let scores: Vec<Option<QueryScore>> = ranked.par_iter()
            .enumerate()
            .map(|(qi, cands)| {
                let mut rng = StdRng::seed_from_u64(mix_seed(seed, repeat as u64, qi as u64));
                let keep = subsample_per_view(cands, &mut rng);
                score_query(cands.iter().zip(keep.iter()).filter(|&(_, &k)| k).map(|(c, _)| c.hit))
            })
            .collect();
        rounds.push(aggregate(scores, max_rank)?);
    }

    let len = rounds.iter().map(|r| r.cmc.len()).min().unwrap_or(0);
    let k = rounds.len() as f64;
    let cmc = (0..len)
        .map(|i| rounds.iter().map(|r| r.cmc[i]).sum::<f64>() / k)
        .collect();
    let map = rounds.iter().map(|r| r.map).sum::<f64>() / k;
    let num_valid_queries = rounds.iter().map(|r| r.num_valid_queries).min().unwrap_or(0);

    Ok(RankingResult { cmc, map, num_valid_queries })
}

/// Marks exactly one uniformly chosen candidate per (identity, camera) group.
fn subsample_per_view(cands: &[Candidate], rng: &mut StdRng) -> Vec<bool> {
    let mut groups: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (idx, c) in cands.iter().enumerate() {
        groups.entry((c.pid, c.camid)).or_default().push(idx);
    }

    let mut keep = vec![false; cands.len()];
    for idxs in groups.values() {
        keep[idxs[rng.gen_range(0..idxs.len())]] = true;
    }
    keep
}

/// SplitMix64-style mixing of the base seed with repeat and query indices.
fn mix_seed(seed: u64, repeat: u64, query: u64) -> u64 {
    let mut z = seed
        ^ repeat.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ query.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
