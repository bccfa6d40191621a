//! Reverse-mode automatic differentiation over [`Matrix`] values.
//!
//! A [`Tape`] records every operation of a forward pass as a node. Nodes are
//! addressed by [`Var`] handles, which are plain indices and therefore `Copy`.
//! [`Tape::backward`] walks the tape in reverse and returns the gradient of a
//! scalar loss with respect to every node that depends on a leaf.
//!
//! The operation set is exactly what the GAT encoder and the alignment/TransE
//! losses need: dense products, row gathers, edge-wise softmax and sparse
//! aggregation, a few activations and reductions.

mod backward;

use std::sync::Arc;

use crate::error::TensorError;
use crate::tensor::sparse::SparsePattern;
use crate::tensor::{Matrix, TensorResult};

pub use backward::Gradients;

/// Offset inside `sqrt` of [`Tape::row_norm`], keeps the gradient finite at 0.
pub const NORM_EPS: f32 = 1e-12;

/// Handle to a node on a [`Tape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(usize);

impl Var {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Leaf,
    Constant,
    MatMul(Var, Var),
    Add(Var, Var),
    Sub(Var, Var),
    Mul(Var, Var),
    Scale(Var, f32),
    AddScalar(Var),
    GatherRows(Var, Arc<[usize]>),
    ConcatRows(Var, Var),
    Spmm {
        weights: Var,
        x: Var,
        pattern: Arc<SparsePattern>,
    },
    SegmentSoftmax {
        scores: Var,
        pattern: Arc<SparsePattern>,
    },
    LeakyRelu(Var, f32),
    Elu(Var),
    Relu(Var),
    RowNorm(Var),
    Sum(Var),
    Mean(Var),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) value: Matrix,
    pub(crate) op: Op,
    pub(crate) needs_grad: bool,
}

/// Recording of one forward pass.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: Vec<Node>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Value computed for `v`.
    pub fn value(&self, v: Var) -> &Matrix {
        &self.nodes[v.0].value
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn needs(&self, v: Var) -> bool {
        self.nodes[v.0].needs_grad
    }

    fn push(&mut self, value: Matrix, op: Op, needs_grad: bool) -> Var {
        self.nodes.push(Node {
            value,
            op,
            needs_grad,
        });
        Var(self.nodes.len() - 1)
    }

    /// A trainable input; gradients flow into it.
    pub fn leaf(&mut self, value: Matrix) -> Var {
        self.push(value, Op::Leaf, true)
    }

    /// A fixed input; no gradient is computed for it.
    pub fn constant(&mut self, value: Matrix) -> Var {
        self.push(value, Op::Constant, false)
    }

    pub fn matmul(&mut self, a: Var, b: Var) -> TensorResult<Var> {
        let value = self.value(a).matmul(self.value(b))?;
        let needs = self.needs(a) || self.needs(b);
        Ok(self.push(value, Op::MatMul(a, b), needs))
    }

    pub fn add(&mut self, a: Var, b: Var) -> TensorResult<Var> {
        let value = self.value(a).zip_map(self.value(b), |x, y| x + y)?;
        let needs = self.needs(a) || self.needs(b);
        Ok(self.push(value, Op::Add(a, b), needs))
    }

    pub fn sub(&mut self, a: Var, b: Var) -> TensorResult<Var> {
        let value = self.value(a).zip_map(self.value(b), |x, y| x - y)?;
        let needs = self.needs(a) || self.needs(b);
        Ok(self.push(value, Op::Sub(a, b), needs))
    }

    /// Element-wise product.
    pub fn mul(&mut self, a: Var, b: Var) -> TensorResult<Var> {
        let value = self.value(a).zip_map(self.value(b), |x, y| x * y)?;
        let needs = self.needs(a) || self.needs(b);
        Ok(self.push(value, Op::Mul(a, b), needs))
    }

    pub fn scale(&mut self, a: Var, factor: f32) -> Var {
        let value = self.value(a).map(|x| x * factor);
        let needs = self.needs(a);
        self.push(value, Op::Scale(a, factor), needs)
    }

    pub fn add_scalar(&mut self, a: Var, c: f32) -> Var {
        let value = self.value(a).map(|x| x + c);
        let needs = self.needs(a);
        self.push(value, Op::AddScalar(a), needs)
    }

    /// Rows `indices` of `a`, in order; indices may repeat.
    pub fn gather_rows(&mut self, a: Var, indices: impl Into<Arc<[usize]>>) -> TensorResult<Var> {
        let indices = indices.into();
        let value = self.value(a).select_rows(&indices)?;
        let needs = self.needs(a);
        Ok(self.push(value, Op::GatherRows(a, indices), needs))
    }

    /// Stack `b` below `a`; both need the same column count.
    pub fn concat_rows(&mut self, a: Var, b: Var) -> TensorResult<Var> {
        let (av, bv) = (self.value(a), self.value(b));
        if av.cols() != bv.cols() {
            return Err(TensorError::ShapeMismatch {
                op: "concat_rows",
                left: av.shape(),
                right: bv.shape(),
            });
        }
        let mut data = Vec::with_capacity(av.len() + bv.len());
        data.extend_from_slice(av.data());
        data.extend_from_slice(bv.data());
        let value = Matrix::from_vec(av.rows() + bv.rows(), av.cols(), data)?;
        let needs = self.needs(a) || self.needs(b);
        Ok(self.push(value, Op::ConcatRows(a, b), needs))
    }

    /// Edge-weighted aggregation: `out[src_e] += weights[e] * x[dst_e]`.
    ///
    /// `weights` is `E x 1`, `x` is `N x d`, the result is `N x d`.
    pub fn spmm(
        &mut self,
        pattern: &Arc<SparsePattern>,
        weights: Var,
        x: Var,
    ) -> TensorResult<Var> {
        let w = self.value(weights);
        let xv = self.value(x);
        if w.shape() != (pattern.num_edges(), 1) {
            return Err(TensorError::ShapeMismatch {
                op: "spmm(weights)",
                left: (pattern.num_edges(), 1),
                right: w.shape(),
            });
        }
        if xv.rows() != pattern.num_nodes() {
            return Err(TensorError::ShapeMismatch {
                op: "spmm(x)",
                left: (pattern.num_nodes(), xv.cols()),
                right: xv.shape(),
            });
        }
        let d = xv.cols();
        let mut out = Matrix::zeros(pattern.num_nodes(), d);
        for node in 0..pattern.num_nodes() {
            for e in pattern.edge_range(node) {
                let we = w.get(e, 0);
                let src_row = xv.row(pattern.dst()[e]);
                for (o, &v) in out.row_mut(node).iter_mut().zip(src_row) {
                    *o += we * v;
                }
            }
        }
        let needs = self.needs(weights) || self.needs(x);
        Ok(self.push(
            out,
            Op::Spmm {
                weights,
                x,
                pattern: Arc::clone(pattern),
            },
            needs,
        ))
    }

    /// Softmax of `E x 1` edge scores over the edges sharing a source node.
    pub fn segment_softmax(
        &mut self,
        pattern: &Arc<SparsePattern>,
        scores: Var,
    ) -> TensorResult<Var> {
        let s = self.value(scores);
        if s.shape() != (pattern.num_edges(), 1) {
            return Err(TensorError::ShapeMismatch {
                op: "segment_softmax",
                left: (pattern.num_edges(), 1),
                right: s.shape(),
            });
        }
        let mut out = Matrix::zeros(pattern.num_edges(), 1);
        for node in 0..pattern.num_nodes() {
            let range = pattern.edge_range(node);
            if range.is_empty() {
                continue;
            }
            let max = range
                .clone()
                .map(|e| s.get(e, 0))
                .fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0;
            for e in range.clone() {
                let v = (s.get(e, 0) - max).exp();
                out.set(e, 0, v);
                total += v;
            }
            for e in range {
                out.set(e, 0, out.get(e, 0) / total);
            }
        }
        let needs = self.needs(scores);
        Ok(self.push(
            out,
            Op::SegmentSoftmax {
                scores,
                pattern: Arc::clone(pattern),
            },
            needs,
        ))
    }

    pub fn leaky_relu(&mut self, a: Var, slope: f32) -> Var {
        let value = self.value(a).map(|x| if x > 0.0 { x } else { slope * x });
        let needs = self.needs(a);
        self.push(value, Op::LeakyRelu(a, slope), needs)
    }

    pub fn elu(&mut self, a: Var) -> Var {
        let value = self.value(a).map(|x| if x > 0.0 { x } else { x.exp() - 1.0 });
        let needs = self.needs(a);
        self.push(value, Op::Elu(a), needs)
    }

    pub fn relu(&mut self, a: Var) -> Var {
        let value = self.value(a).map(|x| x.max(0.0));
        let needs = self.needs(a);
        self.push(value, Op::Relu(a), needs)
    }

    /// Euclidean norm of every row: `N x d -> N x 1`.
    pub fn row_norm(&mut self, a: Var) -> Var {
        let av = self.value(a);
        let mut out = Matrix::zeros(av.rows(), 1);
        for i in 0..av.rows() {
            let sq: f32 = av.row(i).iter().map(|x| x * x).sum();
            out.set(i, 0, (sq + NORM_EPS).sqrt());
        }
        let needs = self.needs(a);
        self.push(out, Op::RowNorm(a), needs)
    }

    pub fn sum(&mut self, a: Var) -> Var {
        let value = Matrix::scalar(self.value(a).sum());
        let needs = self.needs(a);
        self.push(value, Op::Sum(a), needs)
    }

    /// Mean over all entries; the mean of an empty matrix is 0.
    pub fn mean(&mut self, a: Var) -> Var {
        let av = self.value(a);
        let mean = if av.is_empty() {
            0.0
        } else {
            av.sum() / av.len() as f32
        };
        let needs = self.needs(a);
        self.push(Matrix::scalar(mean), Op::Mean(a), needs)
    }
}

#[cfg(test)]
mod tests;
