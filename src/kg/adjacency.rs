//! Sparse adjacency of a knowledge graph, as consumed by the GAT encoder.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::KnowledgeGraph;
use crate::tensor::sparse::SparsePattern;
use crate::tensor::{Matrix, TensorResult};

/// How edge weights are derived from the triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeWeighting {
    /// Every edge weighs 1.
    #[default]
    Uniform,
    /// Edges weigh by relation functionality: `#distinct heads / #triples` for
    /// `head -> tail` edges and `#distinct tails / #triples` for reversed edges.
    /// Parallel edges average their relations' weights.
    Functionality,
}

/// Undirected neighbourhood structure of one graph.
#[derive(Debug, Clone)]
pub struct Adjacency {
    pattern: Arc<SparsePattern>,
    weights: Option<Matrix>,
}

/// Per-relation functionality and inverse functionality.
fn functionality(graph: &KnowledgeGraph) -> Vec<(f32, f32)> {
    let n = graph.num_relations();
    let mut heads: Vec<std::collections::HashSet<usize>> = vec![Default::default(); n];
    let mut tails: Vec<std::collections::HashSet<usize>> = vec![Default::default(); n];
    let mut counts = vec![0usize; n];
    for t in graph.triples() {
        heads[t.relation].insert(t.head);
        tails[t.relation].insert(t.tail);
        counts[t.relation] += 1;
    }
    (0..n)
        .map(|r| {
            if counts[r] == 0 {
                (1.0, 1.0)
            } else {
                let c = counts[r] as f32;
                (heads[r].len() as f32 / c, tails[r].len() as f32 / c)
            }
        })
        .collect()
}

impl Adjacency {
    /// Build the adjacency of `graph`: every triple contributes an edge in both
    /// directions, optionally with a self loop on every entity.
    pub fn from_graph(
        graph: &KnowledgeGraph,
        self_loops: bool,
        weighting: EdgeWeighting,
    ) -> TensorResult<Self> {
        let n = graph.num_entities();
        let mut edges = Vec::with_capacity(graph.triples().len() * 2 + n);
        for t in graph.triples() {
            edges.push((t.head, t.tail));
            edges.push((t.tail, t.head));
        }
        if self_loops {
            edges.extend((0..n).map(|i| (i, i)));
        }
        let pattern = Arc::new(SparsePattern::new(n, edges)?);

        let weights = match weighting {
            EdgeWeighting::Uniform => None,
            EdgeWeighting::Functionality => {
                let func = functionality(graph);
                let mut sums: HashMap<usize, (f32, usize)> = HashMap::new();
                let mut add = |src: usize, dst: usize, w: f32| {
                    if let Some(e) = pattern.find(src, dst) {
                        let entry = sums.entry(e).or_insert((0.0, 0));
                        entry.0 += w;
                        entry.1 += 1;
                    }
                };
                for t in graph.triples() {
                    let (fun, inv) = func[t.relation];
                    if t.head == t.tail {
                        continue;
                    }
                    add(t.head, t.tail, fun);
                    add(t.tail, t.head, inv);
                }
                let mut w = Matrix::filled(pattern.num_edges(), 1, 1.0);
                for (e, (total, count)) in sums {
                    w.set(e, 0, total / count as f32);
                }
                Some(w)
            }
        };
        Ok(Self { pattern, weights })
    }

    pub fn pattern(&self) -> &Arc<SparsePattern> {
        &self.pattern
    }

    /// `E x 1` static edge weights, `None` when uniform.
    pub fn weights(&self) -> Option<&Matrix> {
        self.weights.as_ref()
    }

    pub fn num_edges(&self) -> usize {
        self.pattern.num_edges()
    }
}
