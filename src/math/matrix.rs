use rand::Rng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub, Mul};

use crate::error::{ReidError, ReidResult};

/// Dense row-major matrix. Rows are embeddings, weight rows, or query rows of
/// a distance matrix depending on the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows],
        }
    }

    /// Builds a matrix from rows that must all have width `cols`.
    ///
    /// `cols` is passed explicitly so that an empty row set still carries a
    /// dimensionality (an empty gallery has a known embedding width).
    pub fn from_rows(data: Vec<Vec<f64>>, cols: usize) -> ReidResult<Matrix> {
        if let Some(bad) = data.iter().find(|row| row.len() != cols) {
            return Err(ReidError::DimensionMismatch { expected: cols, actual: bad.len() });
        }
        Ok(Matrix { rows: data.len(), cols, data })
    }

    /// Single-row or otherwise trusted construction; width taken from row 0.
    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        let cols = data.first().map(|r| r.len()).unwrap_or(0);
        Matrix { rows: data.len(), cols, data }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: N(0, sqrt(2 / rows)). `rows` is the fan-in since
    /// layers multiply a row vector on the left.
    pub fn he<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (2.0 / rows.max(1) as f64).sqrt();
        Matrix::normal(rows, cols, std_dev, rng)
    }

    /// Xavier initialization: N(0, sqrt(1 / rows)).
    pub fn xavier<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (1.0 / rows.max(1) as f64).sqrt();
        Matrix::normal(rows, cols, std_dev, rng)
    }

    fn normal<R: Rng>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for v in row.iter_mut() {
                *v = Matrix::sample_standard_normal(rng) * std_dev;
            }
        }
        res
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }
        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect(),
        }
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i]
    }

    /// Squared L2 norm of every row.
    pub fn row_sq_norms(&self) -> Vec<f64> {
        self.data.iter().map(|row| dot(row, row)).collect()
    }

    /// Returns a copy with every row scaled to unit L2 norm. Zero rows stay
    /// zero; the second return value flags them.
    pub fn normalize_rows(&self) -> (Matrix, Vec<bool>) {
        let mut zero = Vec::with_capacity(self.rows);
        let data = self.data.iter()
            .map(|row| {
                let norm = dot(row, row).sqrt();
                if norm > 0.0 && norm.is_finite() {
                    zero.push(false);
                    row.iter().map(|x| x / norm).collect()
                } else {
                    zero.push(true);
                    vec![0.0; row.len()]
                }
            })
            .collect();
        (Matrix { rows: self.rows, cols: self.cols, data }, zero)
    }

    /// `self · otherᵀ` without materializing the transpose. Rows are computed
    /// in parallel and collected in order.
    pub fn mul_transposed(&self, other: &Matrix) -> ReidResult<Matrix> {
        if self.cols != other.cols {
            return Err(ReidError::DimensionMismatch { expected: self.cols, actual: other.cols });
        }
        let data: Vec<Vec<f64>> = self.data
            .par_iter()
            .map(|a| other.data.iter().map(|b| dot(a, b)).collect())
            .collect();
        Ok(Matrix { rows: self.rows, cols: other.rows, data })
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        let data = self.data.iter().zip(other.data.iter())
            .map(|(ra, rb)| ra.iter().zip(rb.iter()).map(|(x, y)| x * y).collect())
            .collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }

    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(self, rhs: Self) -> Self::Output {
        if !self.same_shape(&rhs) {
            panic!("Matrices are of incorrect sizes")
        }
        let mut res = self;
        for (ra, rb) in res.data.iter_mut().zip(rhs.data.iter()) {
            for (x, y) in ra.iter_mut().zip(rb.iter()) {
                *x += y;
            }
        }
        res
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(self, rhs: Self) -> Self::Output {
        if !self.same_shape(&rhs) {
            panic!("Matrices are of incorrect sizes")
        }
        let mut res = self;
        for (ra, rb) in res.data.iter_mut().zip(rhs.data.iter()) {
            for (x, y) in ra.iter_mut().zip(rb.iter()) {
                *x -= y;
            }
        }
        res
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Self) -> Self::Output {
        if self.cols != rhs.rows {
            panic!("Matrices are of incorrect sizes")
        }
        let mut res = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..res.rows {
            for k in 0..self.cols {
                let a = self.data[i][k];
                if a == 0.0 {
                    continue;
                }
                for j in 0..res.cols {
                    res.data[i][j] += a * rhs.data[k][j];
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_transposed_matches_explicit_product() {
        let a = Matrix::from_data(vec![vec![1.0, 2.0], vec![0.0, -1.0]]);
        let b = Matrix::from_data(vec![vec![3.0, 4.0], vec![1.0, 1.0], vec![0.5, 0.0]]);
        let fast = a.mul_transposed(&b).unwrap();
        let slow = a.clone() * b.transpose();
        assert_eq!(fast, slow);
        assert_eq!(fast.data[0], vec![11.0, 3.0, 0.5]);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![1.0]], 2).unwrap_err();
        assert!(matches!(err, ReidError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn normalize_rows_flags_zero_vectors() {
        let m = Matrix::from_data(vec![vec![3.0, 4.0], vec![0.0, 0.0]]);
        let (n, zero) = m.normalize_rows();
        assert_eq!(zero, vec![false, true]);
        assert!((n.data[0][0] - 0.6).abs() < 1e-12);
        assert_eq!(n.data[1], vec![0.0, 0.0]);
    }
}
