//! Compressed sparse row pattern for graph edges.

use serde::{Deserialize, Serialize};

use super::TensorResult;
use crate::error::TensorError;

/// Edge pattern `src -> dst` over `num_nodes` nodes, sorted by `(src, dst)`
/// without duplicates.
///
/// `offsets[i]..offsets[i + 1]` is the range of edges leaving node `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparsePattern {
    num_nodes: usize,
    src: Vec<usize>,
    dst: Vec<usize>,
    offsets: Vec<usize>,
}

impl SparsePattern {
    /// Build a pattern from an arbitrary edge list; duplicates are dropped.
    pub fn new(num_nodes: usize, mut edges: Vec<(usize, usize)>) -> TensorResult<Self> {
        for &(s, d) in &edges {
            let bad = if s >= num_nodes { s } else { d };
            if s >= num_nodes || d >= num_nodes {
                return Err(TensorError::IndexOutOfBounds {
                    index: bad,
                    rows: num_nodes,
                });
            }
        }
        edges.sort_unstable();
        edges.dedup();

        let mut offsets = vec![0usize; num_nodes + 1];
        for &(s, _) in &edges {
            offsets[s + 1] += 1;
        }
        for i in 0..num_nodes {
            offsets[i + 1] += offsets[i];
        }
        let (src, dst) = edges.into_iter().unzip();
        Ok(Self {
            num_nodes,
            src,
            dst,
            offsets,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn src(&self) -> &[usize] {
        &self.src
    }

    pub fn dst(&self) -> &[usize] {
        &self.dst
    }

    /// Edge index range of the edges leaving `node`.
    pub fn edge_range(&self, node: usize) -> std::ops::Range<usize> {
        self.offsets[node]..self.offsets[node + 1]
    }

    /// Index of edge `src -> dst`, if present.
    pub fn find(&self, src: usize, dst: usize) -> Option<usize> {
        let range = self.edge_range(src);
        self.dst[range.clone()]
            .binary_search(&dst)
            .ok()
            .map(|k| range.start + k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_and_dedups() {
        let p = SparsePattern::new(3, vec![(2, 0), (0, 1), (0, 1), (0, 0)]).unwrap();
        assert_eq!(p.num_edges(), 3);
        assert_eq!(p.src(), &[0, 0, 2]);
        assert_eq!(p.dst(), &[0, 1, 0]);
        assert_eq!(p.edge_range(0), 0..2);
        assert_eq!(p.edge_range(1), 2..2);
        assert_eq!(p.find(2, 0), Some(2));
        assert_eq!(p.find(1, 0), None);
    }

    #[test]
    fn rejects_out_of_range_nodes() {
        let err = SparsePattern::new(2, vec![(0, 5)]).unwrap_err();
        assert!(matches!(err, TensorError::IndexOutOfBounds { index: 5, rows: 2 }));
    }
}
