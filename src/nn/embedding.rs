//! Paired embedding tables for the source and target graph.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::param::{ParamId, ParamStore};
use crate::kg::Side;
use crate::tensor::Matrix;

/// What a [`DoubleEmbedding`] embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingKind {
    Entity,
    Relation,
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingKind::Entity => write!(f, "entity"),
            EmbeddingKind::Relation => write!(f, "relation"),
        }
    }
}

/// One table per graph, same dimension, Xavier-initialised.
#[derive(Debug, Clone, Copy)]
pub struct DoubleEmbedding {
    source: ParamId,
    target: ParamId,
    kind: EmbeddingKind,
    dim: usize,
}

impl DoubleEmbedding {
    pub fn new(
        store: &mut ParamStore,
        num_source: usize,
        num_target: usize,
        dim: usize,
        kind: EmbeddingKind,
        sparse: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let source = store.add(
            format!("{kind}_embedding.sr"),
            Matrix::xavier_uniform(num_source, dim, rng),
            sparse,
        );
        let target = store.add(
            format!("{kind}_embedding.tg"),
            Matrix::xavier_uniform(num_target, dim, rng),
            sparse,
        );
        Self {
            source,
            target,
            kind,
            dim,
        }
    }

    pub fn table(&self, side: Side) -> ParamId {
        match side {
            Side::Source => self.source,
            Side::Target => self.target,
        }
    }

    pub fn kind(&self) -> EmbeddingKind {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn tables_have_requested_shapes() {
        let mut store = ParamStore::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let emb = DoubleEmbedding::new(&mut store, 5, 7, 4, EmbeddingKind::Relation, true, &mut rng);
        assert_eq!(store.value(emb.table(Side::Source)).shape(), (5, 4));
        assert_eq!(store.value(emb.table(Side::Target)).shape(), (7, 4));
        assert_eq!(store.get(emb.table(Side::Target)).name, "relation_embedding.tg");
        assert!(store.get(emb.table(Side::Source)).sparse);
    }
}
