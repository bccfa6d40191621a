//! Margin ranking objectives.
//!
//! The alignment loss pulls seed pairs together and pushes each side away from
//! its negatives:
//!
//! ```text
//! relu(gamma + d(s, t) - d(s, t'))  +  relu(gamma + d(s, t) - d(s', t))
//! ```
//!
//! where `t'` ranges over the negatives of `t` in the target graph and `s'`
//! over the negatives of `s` in the source graph.

use crate::autograd::{Tape, Var};
use crate::kg::Pair;
use crate::tensor::TensorResult;

/// Negatives of one batch, aligned with its pairs.
#[derive(Debug, Clone, Default)]
pub struct BatchNegatives {
    /// Source-graph entities near each pair's source entity.
    pub source: Vec<Vec<usize>>,
    /// Target-graph entities near each pair's target entity.
    pub target: Vec<Vec<usize>>,
}

impl BatchNegatives {
    /// Number of `(pair, negative)` terms on each side.
    pub fn len(&self) -> usize {
        self.source.iter().map(Vec::len).sum::<usize>() + self.target.iter().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Alignment loss of `pairs` given the full encodings of both graphs.
///
/// `sr_repr` and `tg_repr` are the encodings of `pairs` gathered in order.
/// Without negatives this degrades to the mean positive distance.
#[allow(clippy::too_many_arguments)]
pub fn alignment_loss(
    tape: &mut Tape,
    out_sr: Var,
    out_tg: Var,
    sr_repr: Var,
    tg_repr: Var,
    pairs: &[Pair],
    negatives: &BatchNegatives,
    gamma: f32,
) -> TensorResult<Var> {
    let diff = tape.sub(sr_repr, tg_repr)?;
    let d_pos = tape.row_norm(diff);
    if negatives.is_empty() {
        return Ok(tape.mean(d_pos));
    }

    // Source anchor against target negatives.
    let mut pos_idx = Vec::new();
    let mut anchor = Vec::new();
    let mut negative = Vec::new();
    for (i, &(s, _)) in pairs.iter().enumerate() {
        for &t_neg in negatives.target.get(i).map(Vec::as_slice).unwrap_or_default() {
            pos_idx.push(i);
            anchor.push(s);
            negative.push(t_neg);
        }
    }
    let tg_terms = hinge(tape, out_sr, out_tg, d_pos, pos_idx, anchor, negative, gamma)?;

    // Target anchor against source negatives.
    let mut pos_idx = Vec::new();
    let mut anchor = Vec::new();
    let mut negative = Vec::new();
    for (i, &(_, t)) in pairs.iter().enumerate() {
        for &s_neg in negatives.source.get(i).map(Vec::as_slice).unwrap_or_default() {
            pos_idx.push(i);
            anchor.push(t);
            negative.push(s_neg);
        }
    }
    let sr_terms = hinge(tape, out_tg, out_sr, d_pos, pos_idx, anchor, negative, gamma)?;

    let terms = tape.concat_rows(tg_terms, sr_terms)?;
    Ok(tape.mean(terms))
}

/// `relu(gamma + d_pos[pos_idx] - ||anchors[anchor] - others[negative]||)`.
#[allow(clippy::too_many_arguments)]
fn hinge(
    tape: &mut Tape,
    anchors: Var,
    others: Var,
    d_pos: Var,
    pos_idx: Vec<usize>,
    anchor: Vec<usize>,
    negative: Vec<usize>,
    gamma: f32,
) -> TensorResult<Var> {
    let pos = tape.gather_rows(d_pos, pos_idx)?;
    let a = tape.gather_rows(anchors, anchor)?;
    let n = tape.gather_rows(others, negative)?;
    let diff = tape.sub(a, n)?;
    let d_neg = tape.row_norm(diff);
    let margin = tape.sub(pos, d_neg)?;
    let margin = tape.add_scalar(margin, gamma);
    Ok(tape.relu(margin))
}

/// TransE objective over the residuals `h + r - t` of true triples.
///
/// With `corrupted` residuals (same row count) this is the margin loss
/// `relu(gamma + ||true|| - ||corrupted||)`; otherwise the mean residual norm.
pub fn transe_loss(
    tape: &mut Tape,
    score: Var,
    corrupted: Option<Var>,
    gamma: f32,
) -> TensorResult<Var> {
    let pos = tape.row_norm(score);
    let Some(corrupted) = corrupted else {
        return Ok(tape.mean(pos));
    };
    let neg = tape.row_norm(corrupted);
    let margin = tape.sub(pos, neg)?;
    let margin = tape.add_scalar(margin, gamma);
    let hinge = tape.relu(margin);
    Ok(tape.mean(hinge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Matrix;

    fn m(rows: usize, cols: usize, data: &[f32]) -> Matrix {
        Matrix::from_vec(rows, cols, data.to_vec()).unwrap()
    }

    #[test]
    fn aligned_pairs_far_from_negatives_cost_nothing() {
        let mut tape = Tape::new();
        let sr = tape.leaf(m(2, 2, &[0.0, 0.0, 10.0, 0.0]));
        let tg = tape.leaf(m(2, 2, &[0.0, 0.0, 0.0, 10.0]));
        let pairs = [(0, 0)];
        let sr_repr = tape.gather_rows(sr, vec![0]).unwrap();
        let tg_repr = tape.gather_rows(tg, vec![0]).unwrap();
        let negatives = BatchNegatives {
            source: vec![vec![1]],
            target: vec![vec![1]],
        };
        let loss = alignment_loss(&mut tape, sr, tg, sr_repr, tg_repr, &pairs, &negatives, 3.0).unwrap();
        assert!(tape.value(loss).item().abs() < 1e-5);
    }

    #[test]
    fn close_negatives_are_penalised_and_pushed_away() {
        let mut tape = Tape::new();
        // pair (0, 0) at distance 1, negative 1 in tg at distance 0.5 from s.
        let sr = tape.leaf(m(2, 1, &[0.0, 5.0]));
        let tg = tape.leaf(m(2, 1, &[1.0, 0.5]));
        let sr_repr = tape.gather_rows(sr, vec![0]).unwrap();
        let tg_repr = tape.gather_rows(tg, vec![0]).unwrap();
        let negatives = BatchNegatives {
            source: vec![vec![]],
            target: vec![vec![1]],
        };
        let loss = alignment_loss(&mut tape, sr, tg, sr_repr, tg_repr, &[(0, 0)], &negatives, 1.0).unwrap();
        // relu(1 + 1 - 0.5)
        assert!((tape.value(loss).item() - 1.5).abs() < 1e-4);
        let grads = tape.backward(loss).unwrap();
        let g_tg = grads.get(tg).unwrap();
        // Descent moves the positive target towards s and the negative away.
        assert!(g_tg.get(0, 0) > 0.0);
        assert!(g_tg.get(1, 0) < 0.0);
    }

    #[test]
    fn no_negatives_falls_back_to_distance() {
        let mut tape = Tape::new();
        let sr = tape.leaf(m(1, 2, &[3.0, 0.0]));
        let tg = tape.leaf(m(1, 2, &[0.0, 4.0]));
        let loss = alignment_loss(&mut tape, sr, tg, sr, tg, &[(0, 0)], &BatchNegatives::default(), 3.0).unwrap();
        assert!((tape.value(loss).item() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn transe_without_corruption_is_mean_norm() {
        let mut tape = Tape::new();
        let score = tape.leaf(m(2, 2, &[3.0, 4.0, 0.0, 0.0]));
        let loss = transe_loss(&mut tape, score, None, 1.0).unwrap();
        assert!((tape.value(loss).item() - 2.5).abs() < 1e-4);
    }

    #[test]
    fn transe_with_corruption_is_margin() {
        let mut tape = Tape::new();
        let score = tape.leaf(m(2, 1, &[1.0, 1.0]));
        let corrupted = tape.leaf(m(2, 1, &[5.0, 1.5]));
        let loss = transe_loss(&mut tape, score, Some(corrupted), 1.0).unwrap();
        // relu(1 + 1 - 5) = 0, relu(1 + 1 - 1.5) = 0.5
        assert!((tape.value(loss).item() - 0.25).abs() < 1e-4);
    }
}
