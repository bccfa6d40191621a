//! Reverse pass of the tape.

use super::{NORM_EPS, Op, Tape, Var};
use crate::error::TensorError;
use crate::tensor::{Matrix, TensorResult};

/// Gradients of a scalar loss with respect to the nodes of a [`Tape`].
#[derive(Debug)]
pub struct Gradients {
    grads: Vec<Option<Matrix>>,
}

impl Gradients {
    /// Gradient of `v`, or `None` if the loss does not depend on it.
    pub fn get(&self, v: Var) -> Option<&Matrix> {
        self.grads.get(v.0).and_then(Option::as_ref)
    }

    /// Move the gradient of `v` out.
    pub fn take(&mut self, v: Var) -> Option<Matrix> {
        self.grads.get_mut(v.0).and_then(Option::take)
    }
}

fn accumulate(grads: &mut [Option<Matrix>], v: Var, g: Matrix) -> TensorResult<()> {
    match &mut grads[v.0] {
        Some(existing) => existing.add_assign(&g),
        slot @ None => {
            *slot = Some(g);
            Ok(())
        }
    }
}

impl Tape {
    /// Back-propagate from a `1 x 1` loss.
    pub fn backward(&self, loss: Var) -> TensorResult<Gradients> {
        let shape = self.value(loss).shape();
        if shape != (1, 1) {
            return Err(TensorError::NonScalarLoss { shape });
        }
        let nodes = self.nodes();
        let mut grads: Vec<Option<Matrix>> = vec![None; nodes.len()];
        grads[loss.0] = Some(Matrix::scalar(1.0));

        for i in (0..=loss.0).rev() {
            let node = &nodes[i];
            // Leaves keep their gradient for the caller.
            if !node.needs_grad || matches!(node.op, Op::Leaf) {
                continue;
            }
            let Some(g) = grads[i].take() else {
                continue;
            };
            let needs = |v: Var| nodes[v.0].needs_grad;
            let val = |v: Var| &nodes[v.0].value;

            match &node.op {
                Op::Leaf | Op::Constant => {}
                Op::MatMul(a, b) => {
                    if needs(*a) {
                        let ga = g.matmul(&val(*b).transpose())?;
                        accumulate(&mut grads, *a, ga)?;
                    }
                    if needs(*b) {
                        let gb = val(*a).transpose().matmul(&g)?;
                        accumulate(&mut grads, *b, gb)?;
                    }
                }
                Op::Add(a, b) => {
                    if needs(*a) {
                        accumulate(&mut grads, *a, g.clone())?;
                    }
                    if needs(*b) {
                        accumulate(&mut grads, *b, g.clone())?;
                    }
                }
                Op::Sub(a, b) => {
                    if needs(*a) {
                        accumulate(&mut grads, *a, g.clone())?;
                    }
                    if needs(*b) {
                        accumulate(&mut grads, *b, g.map(|x| -x))?;
                    }
                }
                Op::Mul(a, b) => {
                    if needs(*a) {
                        accumulate(&mut grads, *a, g.zip_map(val(*b), |x, y| x * y)?)?;
                    }
                    if needs(*b) {
                        accumulate(&mut grads, *b, g.zip_map(val(*a), |x, y| x * y)?)?;
                    }
                }
                Op::Scale(a, factor) => {
                    let factor = *factor;
                    accumulate(&mut grads, *a, g.map(|x| x * factor))?;
                }
                Op::AddScalar(a) => {
                    accumulate(&mut grads, *a, g)?;
                }
                Op::GatherRows(a, indices) => {
                    let src = val(*a);
                    let mut ga = Matrix::zeros(src.rows(), src.cols());
                    for (k, &row) in indices.iter().enumerate() {
                        for (o, &x) in ga.row_mut(row).iter_mut().zip(g.row(k)) {
                            *o += x;
                        }
                    }
                    accumulate(&mut grads, *a, ga)?;
                }
                Op::ConcatRows(a, b) => {
                    let split = val(*a).len();
                    let cols = g.cols();
                    let (top, bottom) = g.data().split_at(split);
                    if needs(*a) {
                        let ga = Matrix::from_vec(val(*a).rows(), cols, top.to_vec())?;
                        accumulate(&mut grads, *a, ga)?;
                    }
                    if needs(*b) {
                        let gb = Matrix::from_vec(val(*b).rows(), cols, bottom.to_vec())?;
                        accumulate(&mut grads, *b, gb)?;
                    }
                }
                Op::Spmm {
                    weights,
                    x,
                    pattern,
                } => {
                    let w = val(*weights);
                    let xv = val(*x);
                    if needs(*weights) {
                        let mut gw = Matrix::zeros(pattern.num_edges(), 1);
                        for e in 0..pattern.num_edges() {
                            let dot: f32 = g
                                .row(pattern.src()[e])
                                .iter()
                                .zip(xv.row(pattern.dst()[e]))
                                .map(|(a, b)| a * b)
                                .sum();
                            gw.set(e, 0, dot);
                        }
                        accumulate(&mut grads, *weights, gw)?;
                    }
                    if needs(*x) {
                        let mut gx = Matrix::zeros(xv.rows(), xv.cols());
                        for e in 0..pattern.num_edges() {
                            let we = w.get(e, 0);
                            let gs = g.row(pattern.src()[e]);
                            for (o, &v) in gx.row_mut(pattern.dst()[e]).iter_mut().zip(gs) {
                                *o += we * v;
                            }
                        }
                        accumulate(&mut grads, *x, gx)?;
                    }
                }
                Op::SegmentSoftmax { scores, pattern } => {
                    let y = &node.value;
                    let mut gs = Matrix::zeros(pattern.num_edges(), 1);
                    for n in 0..pattern.num_nodes() {
                        let range = pattern.edge_range(n);
                        let dot: f32 = range.clone().map(|e| y.get(e, 0) * g.get(e, 0)).sum();
                        for e in range {
                            gs.set(e, 0, y.get(e, 0) * (g.get(e, 0) - dot));
                        }
                    }
                    accumulate(&mut grads, *scores, gs)?;
                }
                Op::LeakyRelu(a, slope) => {
                    let slope = *slope;
                    let ga = g.zip_map(val(*a), |gx, x| if x > 0.0 { gx } else { slope * gx })?;
                    accumulate(&mut grads, *a, ga)?;
                }
                Op::Elu(a) => {
                    let ga = g.zip_map(val(*a), |gx, x| if x > 0.0 { gx } else { gx * x.exp() })?;
                    accumulate(&mut grads, *a, ga)?;
                }
                Op::Relu(a) => {
                    let ga = g.zip_map(val(*a), |gx, x| if x > 0.0 { gx } else { 0.0 })?;
                    accumulate(&mut grads, *a, ga)?;
                }
                Op::RowNorm(a) => {
                    let av = val(*a);
                    let mut ga = Matrix::zeros(av.rows(), av.cols());
                    for r in 0..av.rows() {
                        let norm = node.value.get(r, 0).max(NORM_EPS.sqrt());
                        let coeff = g.get(r, 0) / norm;
                        for (o, &x) in ga.row_mut(r).iter_mut().zip(av.row(r)) {
                            *o = coeff * x;
                        }
                    }
                    accumulate(&mut grads, *a, ga)?;
                }
                Op::Sum(a) => {
                    let (r, c) = val(*a).shape();
                    accumulate(&mut grads, *a, Matrix::filled(r, c, g.item()))?;
                }
                Op::Mean(a) => {
                    let (r, c) = val(*a).shape();
                    let n = (r * c).max(1) as f32;
                    accumulate(&mut grads, *a, Matrix::filled(r, c, g.item() / n))?;
                }
            }
        }
        Ok(Gradients { grads })
    }
}
