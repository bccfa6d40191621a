//! The alignment network: entity/relation tables, a shared GAT encoder and
//! TransE scoring over both graphs.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::assignment::maximize_similarity;
use crate::autograd::{Tape, Var};
use crate::config::TrainConfig;
use crate::error::AlignResult;
use crate::kg::adjacency::Adjacency;
use crate::kg::completion;
use crate::kg::{CrossGraph, Pair, Side, Triple};
use crate::neighbors::{nearest_neighbors, with_workers};
use crate::nn::{Bound, DoubleEmbedding, EmbeddingKind, Gat, ParamStore};
use crate::tensor::distance::{cosine_similarity, pairwise_l2};
use crate::tensor::{Matrix, TensorResult};

/// A pair accepted by matching, with its similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPair {
    pub pair: Pair,
    pub similarity: f32,
}

/// Pseudo-labels produced by one bootstrap round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapPairs {
    pub entities: Vec<ScoredPair>,
    pub relations: Vec<ScoredPair>,
}

/// Candidate ids on each side for a bootstrap round.
#[derive(Debug, Clone, Copy)]
pub struct Candidates<'a> {
    pub source: &'a [usize],
    pub target: &'a [usize],
}

/// Inference surface shared by alignment networks.
pub trait AlignModel {
    /// L2 distances between encoded `sr_data` (rows) and `tg_data` (columns).
    fn predict(&self, sr_data: &[usize], tg_data: &[usize]) -> TensorResult<Matrix>;

    /// Match candidates one-to-one by cosine similarity and keep the pairs
    /// scoring at least `threshold`.
    fn bootstrap(
        &self,
        entities: Candidates<'_>,
        relations: Candidates<'_>,
        threshold: f32,
    ) -> AlignResult<BootstrapPairs>;
}

/// Tape handles produced by [`GatNet::forward`].
#[derive(Debug, Clone, Copy)]
pub struct Forward {
    /// Encodings of every source entity.
    pub out_sr: Var,
    /// Encodings of every target entity.
    pub out_tg: Var,
    pub rel_sr: Var,
    pub rel_tg: Var,
    /// `out_sr[sr_data]`.
    pub sr_repr: Var,
    /// `out_tg[tg_data]`.
    pub tg_repr: Var,
    /// Source residuals stacked over target residuals.
    pub transe_score: Var,
}

#[derive(Debug, Clone)]
pub struct GatNet {
    store: ParamStore,
    entity: DoubleEmbedding,
    relation: DoubleEmbedding,
    gat: Gat,
    adj_sr: Adjacency,
    adj_tg: Adjacency,
    num_workers: usize,
}

impl GatNet {
    /// Build a freshly initialised network for `data`.
    pub fn new(data: &CrossGraph, config: &TrainConfig, rng: &mut StdRng) -> TensorResult<Self> {
        let adj_sr = Adjacency::from_graph(&data.source, config.self_loops, config.edge_weighting)?;
        let adj_tg = Adjacency::from_graph(&data.target, config.self_loops, config.edge_weighting)?;
        let mut store = ParamStore::new();
        let entity = DoubleEmbedding::new(
            &mut store,
            data.source.num_entities(),
            data.target.num_entities(),
            config.dim,
            EmbeddingKind::Entity,
            config.sparse,
            rng,
        );
        let relation = DoubleEmbedding::new(
            &mut store,
            data.source.num_relations(),
            data.target.num_relations(),
            config.dim,
            EmbeddingKind::Relation,
            config.sparse,
            rng,
        );
        let gat = Gat::new(&mut store, config.gat(), rng);
        tracing::debug!(
            params = store.len(),
            weights = store.num_weights(),
            edges_sr = adj_sr.num_edges(),
            edges_tg = adj_tg.num_edges(),
            "built GAT alignment network"
        );
        Ok(Self {
            store,
            entity,
            relation,
            gat,
            adj_sr,
            adj_tg,
            num_workers: config.num_workers,
        })
    }

    /// Build the network a run with `config` trains on `data`, completing
    /// both graphs first when `graph_completion` is set.
    pub fn for_run(
        data: &mut CrossGraph,
        config: &TrainConfig,
        rng: &mut StdRng,
    ) -> TensorResult<Self> {
        if config.graph_completion {
            completion::complete(data);
        }
        Self::new(data, config, rng)
    }

    pub fn params(&self) -> &ParamStore {
        &self.store
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.store
    }

    pub fn entity_embedding(&self) -> &DoubleEmbedding {
        &self.entity
    }

    pub fn relation_embedding(&self) -> &DoubleEmbedding {
        &self.relation
    }

    fn adjacency(&self, side: Side) -> &Adjacency {
        match side {
            Side::Source => &self.adj_sr,
            Side::Target => &self.adj_tg,
        }
    }

    /// Encode every entity of one graph.
    pub fn encode(
        &self,
        tape: &mut Tape,
        bound: &Bound,
        side: Side,
        rng: Option<&mut StdRng>,
    ) -> TensorResult<Var> {
        let x = bound.var(self.entity.table(side));
        self.gat.forward(tape, bound, x, self.adjacency(side), rng)
    }

    /// `h + r - t` for every triple, one row each.
    pub fn trans_e(
        &self,
        tape: &mut Tape,
        ent: Var,
        rel: Var,
        triples: &[Triple],
    ) -> TensorResult<Var> {
        let heads: Vec<usize> = triples.iter().map(|t| t.head).collect();
        let tails: Vec<usize> = triples.iter().map(|t| t.tail).collect();
        let rels: Vec<usize> = triples.iter().map(|t| t.relation).collect();
        let h = tape.gather_rows(ent, heads)?;
        let t = tape.gather_rows(ent, tails)?;
        let r = tape.gather_rows(rel, rels)?;
        let hr = tape.add(h, r)?;
        tape.sub(hr, t)
    }

    /// Training forward pass over both graphs. Passing an RNG enables dropout.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        tape: &mut Tape,
        bound: &Bound,
        sr_data: &[usize],
        tg_data: &[usize],
        triples_sr: &[Triple],
        triples_tg: &[Triple],
        mut rng: Option<&mut StdRng>,
    ) -> TensorResult<Forward> {
        let out_sr = self.encode(tape, bound, Side::Source, rng.as_deref_mut())?;
        let out_tg = self.encode(tape, bound, Side::Target, rng)?;
        let rel_sr = bound.var(self.relation.table(Side::Source));
        let rel_tg = bound.var(self.relation.table(Side::Target));
        let score_sr = self.trans_e(tape, out_sr, rel_sr, triples_sr)?;
        let score_tg = self.trans_e(tape, out_tg, rel_tg, triples_tg)?;
        let transe_score = tape.concat_rows(score_sr, score_tg)?;
        let sr_repr = tape.gather_rows(out_sr, sr_data.to_vec())?;
        let tg_repr = tape.gather_rows(out_tg, tg_data.to_vec())?;
        Ok(Forward {
            out_sr,
            out_tg,
            rel_sr,
            rel_tg,
            sr_repr,
            tg_repr,
            transe_score,
        })
    }

    /// Encodings of every entity of both graphs, without dropout or gradients.
    pub fn embeddings(&self) -> TensorResult<(Matrix, Matrix)> {
        let mut tape = Tape::new();
        let bound = self.store.bind_frozen(&mut tape);
        let sr = self.encode(&mut tape, &bound, Side::Source, None)?;
        let tg = self.encode(&mut tape, &bound, Side::Target, None)?;
        Ok((tape.value(sr).clone(), tape.value(tg).clone()))
    }

    /// For every entity of `sr_data` (and of `tg_data`), its `k` nearest other
    /// members of the same list under the current encoder.
    pub fn negative_sample(
        &self,
        sr_data: &[usize],
        tg_data: &[usize],
        k: usize,
    ) -> TensorResult<(Vec<Vec<usize>>, Vec<Vec<usize>>)> {
        let (emb_sr, emb_tg) = self.embeddings()?;
        let sr_repr = emb_sr.select_rows(sr_data)?;
        let tg_repr = emb_tg.select_rows(tg_data)?;
        with_workers(self.num_workers, || {
            let dist_sr = pairwise_l2(&sr_repr, &sr_repr)?;
            let dist_tg = pairwise_l2(&tg_repr, &tg_repr)?;
            Ok((
                nearest_neighbors(&dist_sr, sr_data, k),
                nearest_neighbors(&dist_tg, tg_data, k),
            ))
        })
    }
}

/// Optimal matching between `candidates` keeping pairs with similarity at
/// least `threshold`, mapped back to candidate ids.
fn match_candidates(
    sim: &Matrix,
    candidates: Candidates<'_>,
    threshold: f32,
) -> AlignResult<Vec<ScoredPair>> {
    let matched = maximize_similarity(sim)?;
    Ok(matched
        .into_iter()
        .filter_map(|(i, j)| {
            let similarity = sim.get(i, j);
            (similarity >= threshold).then(|| ScoredPair {
                pair: (candidates.source[i], candidates.target[j]),
                similarity,
            })
        })
        .collect())
}

impl AlignModel for GatNet {
    fn predict(&self, sr_data: &[usize], tg_data: &[usize]) -> TensorResult<Matrix> {
        let (emb_sr, emb_tg) = self.embeddings()?;
        let sr_repr = emb_sr.select_rows(sr_data)?;
        let tg_repr = emb_tg.select_rows(tg_data)?;
        pairwise_l2(&sr_repr, &tg_repr)
    }

    fn bootstrap(
        &self,
        entities: Candidates<'_>,
        relations: Candidates<'_>,
        threshold: f32,
    ) -> AlignResult<BootstrapPairs> {
        let (emb_sr, emb_tg) = self.embeddings()?;
        let ent_sim = cosine_similarity(
            &emb_sr.select_rows(entities.source)?,
            &emb_tg.select_rows(entities.target)?,
        )?;
        let rel_sr = self.store.value(self.relation.table(Side::Source));
        let rel_tg = self.store.value(self.relation.table(Side::Target));
        let rel_sim = cosine_similarity(
            &rel_sr.select_rows(relations.source)?,
            &rel_tg.select_rows(relations.target)?,
        )?;
        let pairs = BootstrapPairs {
            entities: match_candidates(&ent_sim, entities, threshold)?,
            relations: match_candidates(&rel_sim, relations, threshold)?,
        };
        tracing::debug!(
            entity_candidates = entities.source.len().min(entities.target.len()),
            entities = pairs.entities.len(),
            relations = pairs.relations.len(),
            threshold,
            "bootstrap matching"
        );
        Ok(pairs)
    }
}
