//! Sparse multi-head graph attention encoder.
//!
//! For every head, with `Wh = x W`:
//!
//! ```text
//! e_ij    = LeakyReLU(a_src . Wh_i + a_dst . Wh_j)      for each edge i -> j
//! att_ij  = softmax_j(e_ij) [* w_ij]
//! h'_i    = sum_j att_ij Wh_j
//! ```
//!
//! Heads are averaged so every layer keeps the embedding dimension; hidden
//! layers apply ELU. One encoder is shared by both graphs.

use rand::Rng;
use rand::rngs::StdRng;

use super::param::{Bound, ParamId, ParamStore};
use crate::autograd::{Tape, Var};
use crate::kg::adjacency::Adjacency;
use crate::tensor::{Matrix, TensorResult};

#[derive(Debug, Clone, Copy)]
struct Head {
    w: ParamId,
    a_src: ParamId,
    a_dst: ParamId,
}

/// Hyper-parameters of a [`Gat`] encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatConfig {
    pub dim: usize,
    pub nheads: usize,
    pub num_layer: usize,
    pub dropout: f32,
    /// Negative slope of the attention LeakyReLU.
    pub alpha: f32,
}

#[derive(Debug, Clone)]
pub struct Gat {
    layers: Vec<Vec<Head>>,
    config: GatConfig,
}

impl Gat {
    pub fn new(store: &mut ParamStore, config: GatConfig, rng: &mut impl Rng) -> Self {
        let d = config.dim;
        let layers = (0..config.num_layer)
            .map(|l| {
                (0..config.nheads)
                    .map(|h| Head {
                        w: store.add(
                            format!("gat.{l}.{h}.w"),
                            Matrix::xavier_uniform(d, d, rng),
                            false,
                        ),
                        a_src: store.add(
                            format!("gat.{l}.{h}.a_src"),
                            Matrix::xavier_uniform(d, 1, rng),
                            false,
                        ),
                        a_dst: store.add(
                            format!("gat.{l}.{h}.a_dst"),
                            Matrix::xavier_uniform(d, 1, rng),
                            false,
                        ),
                    })
                    .collect()
            })
            .collect();
        Self { layers, config }
    }

    pub fn config(&self) -> &GatConfig {
        &self.config
    }

    fn dropout(&self, tape: &mut Tape, x: Var, rng: Option<&mut StdRng>) -> TensorResult<Var> {
        let p = self.config.dropout;
        let Some(rng) = rng else {
            return Ok(x);
        };
        if p <= 0.0 {
            return Ok(x);
        }
        let keep = 1.0 - p;
        let (r, c) = tape.value(x).shape();
        let mask: Vec<f32> = (0..r * c)
            .map(|_| if rng.gen_bool(f64::from(keep)) { 1.0 / keep } else { 0.0 })
            .collect();
        let mask = tape.constant(Matrix::from_vec(r, c, mask)?);
        tape.mul(x, mask)
    }

    fn head(
        &self,
        tape: &mut Tape,
        bound: &Bound,
        head: &Head,
        x: Var,
        adj: &Adjacency,
    ) -> TensorResult<Var> {
        let pattern = adj.pattern();
        let wh = tape.matmul(x, bound.var(head.w))?;
        let s = tape.matmul(wh, bound.var(head.a_src))?;
        let t = tape.matmul(wh, bound.var(head.a_dst))?;
        let es = tape.gather_rows(s, pattern.src())?;
        let et = tape.gather_rows(t, pattern.dst())?;
        let logits = tape.add(es, et)?;
        let logits = tape.leaky_relu(logits, self.config.alpha);
        let mut att = tape.segment_softmax(pattern, logits)?;
        if let Some(w) = adj.weights() {
            let w = tape.constant(w.clone());
            att = tape.mul(att, w)?;
        }
        tape.spmm(pattern, att, wh)
    }

    /// Encode all entities of one graph. `x` is the `N x dim` entity table;
    /// passing an RNG enables dropout (training mode).
    pub fn forward(
        &self,
        tape: &mut Tape,
        bound: &Bound,
        x: Var,
        adj: &Adjacency,
        mut rng: Option<&mut StdRng>,
    ) -> TensorResult<Var> {
        let mut h = x;
        let last = self.layers.len().saturating_sub(1);
        for (l, heads) in self.layers.iter().enumerate() {
            let input = self.dropout(tape, h, rng.as_deref_mut())?;
            let mut acc: Option<Var> = None;
            for head in heads {
                let out = self.head(tape, bound, head, input, adj)?;
                acc = Some(match acc {
                    Some(prev) => tape.add(prev, out)?,
                    None => out,
                });
            }
            let Some(sum) = acc else {
                continue;
            };
            h = tape.scale(sum, 1.0 / heads.len() as f32);
            if l != last {
                h = tape.elu(h);
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg::adjacency::EdgeWeighting;
    use crate::kg::{KnowledgeGraph, Triple, Vocabulary, fixtures};
    use rand::SeedableRng;

    fn setup(dropout: f32) -> (ParamStore, Gat, Adjacency, Matrix) {
        let cg = fixtures::mirrored(6);
        let adj = Adjacency::from_graph(&cg.source, true, EdgeWeighting::Uniform).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = ParamStore::new();
        let config = GatConfig {
            dim: 4,
            nheads: 2,
            num_layer: 2,
            dropout,
            alpha: 0.2,
        };
        let gat = Gat::new(&mut store, config, &mut rng);
        let x = Matrix::xavier_uniform(6, 4, &mut rng);
        (store, gat, adj, x)
    }

    #[test]
    fn output_keeps_shape_and_registers_params() {
        let (store, gat, adj, x) = setup(0.0);
        assert_eq!(store.len(), 2 * 2 * 3);
        let mut tape = Tape::new();
        let bound = store.bind(&mut tape);
        let xv = tape.leaf(x);
        let out = gat.forward(&mut tape, &bound, xv, &adj, None).unwrap();
        assert_eq!(tape.value(out).shape(), (6, 4));
        assert!(tape.value(out).all_finite());
    }

    #[test]
    fn gradients_reach_every_parameter() {
        let (store, gat, adj, x) = setup(0.0);
        let mut tape = Tape::new();
        let bound = store.bind(&mut tape);
        let xv = tape.leaf(x);
        let out = gat.forward(&mut tape, &bound, xv, &adj, None).unwrap();
        let sq = tape.mul(out, out).unwrap();
        let loss = tape.sum(sq);
        let mut grads = tape.backward(loss).unwrap();
        assert!(grads.get(xv).is_some());
        assert_eq!(bound.collect(&mut grads).len(), store.len());
    }

    /// Star around entity 0 plus one pendant edge; relation 0 has a single
    /// head over three triples.
    fn weighted_adjacency(weighting: EdgeWeighting) -> Adjacency {
        let mut kg = KnowledgeGraph::new(Vocabulary::with_len(5), Vocabulary::with_len(2));
        for tail in 1..4 {
            kg.add_triple(Triple::new(0, 0, tail)).unwrap();
        }
        kg.add_triple(Triple::new(3, 1, 4)).unwrap();
        Adjacency::from_graph(&kg, false, weighting).unwrap()
    }

    #[test]
    fn functionality_weights_change_attention_and_keep_gradients() {
        let (store, gat, _, x) = setup(0.0);
        let x = Matrix::from_vec(5, 4, x.data()[..20].to_vec()).unwrap();
        let weighted = weighted_adjacency(EdgeWeighting::Functionality);
        assert!(weighted.weights().is_some());

        let run = |adj: &Adjacency| {
            let mut tape = Tape::new();
            let bound = store.bind(&mut tape);
            let xv = tape.leaf(x.clone());
            let out = gat.forward(&mut tape, &bound, xv, adj, None).unwrap();
            let value = tape.value(out).clone();
            let sq = tape.mul(out, out).unwrap();
            let loss = tape.sum(sq);
            let mut grads = tape.backward(loss).unwrap();
            let reached = bound.collect(&mut grads).len();
            (value, reached)
        };
        let (uniform, _) = run(&weighted_adjacency(EdgeWeighting::Uniform));
        let (out, reached) = run(&weighted);
        assert!(out.all_finite());
        assert_ne!(out, uniform);
        assert_eq!(reached, store.len());
    }

    #[test]
    fn dropout_only_applies_with_rng() {
        let (store, gat, adj, x) = setup(0.5);
        let run = |rng: Option<&mut StdRng>| {
            let mut tape = Tape::new();
            let bound = store.bind_frozen(&mut tape);
            let xv = tape.constant(x.clone());
            let out = gat.forward(&mut tape, &bound, xv, &adj, rng).unwrap();
            tape.value(out).clone()
        };
        let eval_a = run(None);
        let eval_b = run(None);
        assert_eq!(eval_a, eval_b);
        let mut rng = StdRng::seed_from_u64(11);
        let train = run(Some(&mut rng));
        assert_ne!(train, eval_a);
    }
}
