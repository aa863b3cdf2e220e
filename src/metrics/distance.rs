use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Serialize, Deserialize};

use crate::error::{ConfigError, ReidError, ReidResult};
use crate::math::matrix::Matrix;

/// Distance assigned to any pair involving a zero-norm embedding in cosine
/// mode; the largest value `1 - cos` can take.
pub const COSINE_ZERO_NORM_DISTANCE: f64 = 2.0;

/// Pairwise dissimilarity used to rank the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// ‖q‖² + ‖g‖² − 2·q·g
    #[default]
    SquaredEuclidean,
    /// 1 − q̂·ĝ on unit-normalized embeddings.
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "squared_euclidean" => Ok(DistanceMetric::SquaredEuclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(ConfigError::invalid_value("metric", format!("unknown metric `{other}`"))),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::SquaredEuclidean => write!(f, "euclidean"),
            DistanceMetric::Cosine => write!(f, "cosine"),
        }
    }
}

/// Dense `query × gallery` matrix of non-negative distances. Read-only once
/// built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    inner: Matrix,
}

impl DistanceMatrix {
    /// Wraps precomputed distances, e.g. ones loaded from disk.
    pub fn from_rows(rows: Vec<Vec<f64>>, num_gallery: usize) -> ReidResult<DistanceMatrix> {
        Ok(DistanceMatrix { inner: Matrix::from_rows(rows, num_gallery)? })
    }

    pub fn num_query(&self) -> usize {
        self.inner.rows
    }

    pub fn num_gallery(&self) -> usize {
        self.inner.cols
    }

    pub fn get(&self, query: usize, gallery: usize) -> f64 {
        self.inner.data[query][gallery]
    }

    pub fn row(&self, query: usize) -> &[f64] {
        self.inner.row(query)
    }

    pub fn as_matrix(&self) -> &Matrix {
        &self.inner
    }
}

/// Builds the pairwise distance matrix between `query` and `gallery`
/// embeddings (one embedding per row).
///
/// Fails with [`ReidError::DimensionMismatch`] before allocating anything if
/// the two sets disagree on embedding width.
pub fn compute_distance_matrix(
    query: &Matrix,
    gallery: &Matrix,
    metric: DistanceMetric,
) -> ReidResult<DistanceMatrix> {
    if query.cols != gallery.cols {
        return Err(ReidError::DimensionMismatch { expected: query.cols, actual: gallery.cols });
    }

    let inner = match metric {
        DistanceMetric::SquaredEuclidean => squared_euclidean(query, gallery)?,
        DistanceMetric::Cosine => cosine(query, gallery)?,
    };
    Ok(DistanceMatrix { inner })
}

fn squared_euclidean(query: &Matrix, gallery: &Matrix) -> ReidResult<Matrix> {
    let q_sq = query.row_sq_norms();
    let g_sq = gallery.row_sq_norms();
    let cross = query.mul_transposed(gallery)?;

    let data = cross.data
        .into_par_iter()
        .zip(q_sq.into_par_iter())
        .map(|(row, qn)| {
            row.iter()
                .zip(g_sq.iter())
                // cancellation can leave tiny negatives
                .map(|(qg, gn)| (qn + gn - 2.0 * qg).max(0.0))
                .collect()
        })
        .collect();
    Ok(Matrix { rows: query.rows, cols: gallery.rows, data })
}

fn cosine(query: &Matrix, gallery: &Matrix) -> ReidResult<Matrix> {
    let (qn, q_zero) = query.normalize_rows();
    let (gn, g_zero) = gallery.normalize_rows();
    let sim = qn.mul_transposed(&gn)?;

    let data = sim.data
        .into_par_iter()
        .zip(q_zero.into_par_iter())
        .map(|(row, qz)| {
            row.iter()
                .zip(g_zero.iter())
                .map(|(s, &gz)| {
                    if qz || gz {
                        COSINE_ZERO_NORM_DISTANCE
                    } else {
                        (1.0 - s).clamp(0.0, COSINE_ZERO_NORM_DISTANCE)
                    }
                })
                .collect()
        })
        .collect();
    Ok(Matrix { rows: query.rows, cols: gallery.rows, data })
}
