//! Pairwise distance and similarity kernels between embedding sets.

use rayon::prelude::*;

use super::{Matrix, TensorResult};
use crate::error::TensorError;

fn check_dims(a: &Matrix, b: &Matrix, op: &'static str) -> TensorResult<()> {
    if a.cols() != b.cols() {
        return Err(TensorError::ShapeMismatch {
            op,
            left: a.shape(),
            right: b.shape(),
        });
    }
    Ok(())
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// `n x m` matrix of Euclidean distances between the rows of `a` and `b`.
pub fn pairwise_l2(a: &Matrix, b: &Matrix) -> TensorResult<Matrix> {
    check_dims(a, b, "pairwise_l2")?;
    let m = b.rows();
    let mut out = Matrix::zeros(a.rows(), m);
    if m == 0 {
        return Ok(out);
    }
    out.data_mut()
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, row)| {
            let ai = a.row(i);
            for (j, d) in row.iter_mut().enumerate() {
                *d = l2(ai, b.row(j));
            }
        });
    Ok(out)
}

/// `n x m` matrix of cosine similarities between the rows of `a` and `b`.
///
/// Rows with zero norm have similarity 0 to everything.
pub fn cosine_similarity(a: &Matrix, b: &Matrix) -> TensorResult<Matrix> {
    check_dims(a, b, "cosine_similarity")?;
    let m = b.rows();
    let mut out = Matrix::zeros(a.rows(), m);
    if m == 0 {
        return Ok(out);
    }
    let b_norms: Vec<f32> = (0..m).map(|j| norm(b.row(j))).collect();
    out.data_mut()
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, row)| {
            let ai = a.row(i);
            let na = norm(ai);
            for (j, s) in row.iter_mut().enumerate() {
                let denom = na * b_norms[j];
                *s = if denom == 0.0 {
                    0.0
                } else {
                    ai.iter().zip(b.row(j)).map(|(x, y)| x * y).sum::<f32>() / denom
                };
            }
        });
    Ok(out)
}
