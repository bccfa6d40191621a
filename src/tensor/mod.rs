//! Dense row-major `f32` matrices.
//!
//! This is the numeric substrate of the crate: embedding tables, GAT
//! activations, gradients and optimiser state are all [`Matrix`] values.
//! Hot loops are parallelised over output rows with rayon.

pub mod distance;
pub mod sparse;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::TensorError;

/// Result type for tensor operations.
pub type TensorResult<T> = std::result::Result<T, TensorError>;

/// Rows below this count are processed sequentially.
const PAR_MIN_ROWS: usize = 64;

/// A dense `rows x cols` matrix stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// A `1x1` matrix holding `value`.
    pub fn scalar(value: f32) -> Self {
        Self::filled(1, 1, value)
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> TensorResult<Self> {
        if data.len() != rows * cols {
            return Err(TensorError::BadBuffer {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> TensorResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(TensorError::ShapeMismatch {
                    op: "from_rows",
                    left: (1, cols),
                    right: (1, row.len()),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Xavier/Glorot uniform initialisation: `U(-b, b)` with
    /// `b = sqrt(6 / (rows + cols))`.
    pub fn xavier_uniform(rows: usize, cols: usize, rng: &mut impl Rng) -> Self {
        let bound = (6.0 / (rows + cols).max(1) as f32).sqrt();
        let data = (0..rows * cols)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.cols + j] = value;
    }

    /// The single value of a `1x1` matrix.
    pub fn item(&self) -> f32 {
        debug_assert_eq!(self.shape(), (1, 1));
        self.data[0]
    }

    fn check_same_shape(&self, other: &Matrix, op: &'static str) -> TensorResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                op,
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        out
    }

    /// Matrix product `self * other`.
    pub fn matmul(&self, other: &Matrix) -> TensorResult<Matrix> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                op: "matmul",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (k, m) = (self.cols, other.cols);
        let mut out = Matrix::zeros(self.rows, m);
        if m == 0 {
            return Ok(out);
        }
        let kernel = |(i, out_row): (usize, &mut [f32])| {
            let a_row = &self.data[i * k..(i + 1) * k];
            for (p, &a) in a_row.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                let b_row = &other.data[p * m..(p + 1) * m];
                for (o, &b) in out_row.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        };
        if self.rows >= PAR_MIN_ROWS {
            out.data.par_chunks_mut(m).enumerate().for_each(kernel);
        } else {
            out.data.chunks_mut(m).enumerate().for_each(kernel);
        }
        Ok(out)
    }

    /// Element-wise `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) -> TensorResult<()> {
        self.check_same_shape(other, "add")?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    /// Element-wise `self += alpha * other`.
    pub fn axpy(&mut self, alpha: f32, other: &Matrix) -> TensorResult<()> {
        self.check_same_shape(other, "axpy")?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += alpha * b;
        }
        Ok(())
    }

    /// Apply `f` to every entry, producing a new matrix.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combine two equally shaped matrices entry by entry.
    pub fn zip_map(&self, other: &Matrix, f: impl Fn(f32, f32) -> f32) -> TensorResult<Matrix> {
        self.check_same_shape(other, "zip_map")?;
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    pub fn scale(&mut self, factor: f32) {
        for x in &mut self.data {
            *x *= factor;
        }
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Copy the given rows into a new `indices.len() x cols` matrix.
    pub fn select_rows(&self, indices: &[usize]) -> TensorResult<Matrix> {
        let mut out = Matrix::zeros(indices.len(), self.cols);
        for (dst, &src) in indices.iter().enumerate() {
            if src >= self.rows {
                return Err(TensorError::IndexOutOfBounds {
                    index: src,
                    rows: self.rows,
                });
            }
            out.row_mut(dst).copy_from_slice(self.row(src));
        }
        Ok(out)
    }

    /// Whether every entry of row `i` is exactly zero.
    pub fn row_is_zero(&self, i: usize) -> bool {
        self.row(i).iter().all(|&x| x == 0.0)
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn m(rows: usize, cols: usize, data: &[f32]) -> Matrix {
        Matrix::from_vec(rows, cols, data.to_vec()).unwrap()
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = Matrix::from_vec(2, 2, vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, TensorError::BadBuffer { len: 3, .. }));
    }

    #[test]
    fn matmul_small() {
        let a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = m(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_parallel_matches_sequential() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let a = Matrix::xavier_uniform(200, 16, &mut rng);
        let b = Matrix::xavier_uniform(16, 8, &mut rng);
        let c = a.matmul(&b).unwrap();
        for i in [0, 63, 64, 199] {
            for j in 0..8 {
                let expected: f32 = (0..16).map(|p| a.get(i, p) * b.get(p, j)).sum();
                assert!((c.get(i, j) - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn matmul_shape_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(matches!(
            a.matmul(&b),
            Err(TensorError::ShapeMismatch { op: "matmul", .. })
        ));
    }

    #[test]
    fn transpose_roundtrip() {
        let a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(2, 1), 6.0);
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn select_rows_checks_bounds() {
        let a = m(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let s = a.select_rows(&[1, 1, 0]).unwrap();
        assert_eq!(s.data(), &[3.0, 4.0, 3.0, 4.0, 1.0, 2.0]);
        assert!(matches!(
            a.select_rows(&[2]),
            Err(TensorError::IndexOutOfBounds { index: 2, rows: 2 })
        ));
    }

    #[test]
    fn xavier_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let w = Matrix::xavier_uniform(10, 14, &mut rng);
        let bound = (6.0f32 / 24.0).sqrt();
        assert!(w.data().iter().all(|x| x.abs() <= bound));
        assert!(w.data().iter().any(|&x| x != 0.0));
    }
}
