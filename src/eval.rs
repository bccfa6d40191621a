//! Alignment metrics: Hits@k and mean reciprocal rank.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::tensor::Matrix;

/// Metrics for one ranking direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionMetrics {
    /// `(k, percent of queries ranked within k)`.
    pub hits: Vec<(usize, f32)>,
    pub mrr: f32,
}

impl DirectionMetrics {
    fn from_ranks(ranks: &[usize], top_k: &[usize]) -> Self {
        let n = ranks.len().max(1) as f32;
        let hits = top_k
            .iter()
            .map(|&k| {
                let within = ranks.iter().filter(|&&r| r < k).count();
                (k, 100.0 * within as f32 / n)
            })
            .collect();
        let mrr = ranks.iter().map(|&r| 1.0 / (r + 1) as f32).sum::<f32>() / n;
        Self { hits, mrr }
    }

    /// Hits@k, if `k` was evaluated.
    pub fn hits_at(&self, k: usize) -> Option<f32> {
        self.hits.iter().find(|(kk, _)| *kk == k).map(|&(_, h)| h)
    }
}

/// Metrics in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Source entities querying target candidates (rows).
    pub sr_to_tg: DirectionMetrics,
    /// Target entities querying source candidates (columns).
    pub tg_to_sr: DirectionMetrics,
}

impl std::fmt::Display for EvalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (label, m) in [("sr->tg", &self.sr_to_tg), ("tg->sr", &self.tg_to_sr)] {
            write!(f, "{label}:")?;
            for (k, h) in &m.hits {
                write!(f, " Hits@{k}={h:.2}%")?;
            }
            writeln!(f, " MRR={:.4}", m.mrr)?;
        }
        Ok(())
    }
}

/// Rank of the diagonal entry of every row: number of strictly smaller entries.
fn row_ranks(dist: &Matrix) -> Vec<usize> {
    (0..dist.rows())
        .into_par_iter()
        .map(|i| {
            let row = dist.row(i);
            let target = row[i];
            row.iter().filter(|&&d| d < target).count()
        })
        .collect()
}

/// Evaluate a square distance matrix whose diagonal holds the true pairs.
pub fn evaluate(dist: &Matrix, top_k: &[usize]) -> EvalReport {
    debug_assert_eq!(dist.rows(), dist.cols());
    EvalReport {
        sr_to_tg: DirectionMetrics::from_ranks(&row_ranks(dist), top_k),
        tg_to_sr: DirectionMetrics::from_ranks(&row_ranks(&dist.transpose()), top_k),
    }
}
