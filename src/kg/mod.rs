//! Knowledge graphs and the cross-graph alignment data set.
//!
//! - [`Vocabulary`]: dense local ids for the entities or relations of one graph
//! - [`KnowledgeGraph`]: vocabularies plus `(head, relation, tail)` triples
//! - [`CrossGraph`]: source/target graphs with seed, test and relation alignments
//! - [`adjacency`]: sparse neighbourhood structure fed to the GAT encoder
//! - [`completion`]: transfer of triples across graphs through seed alignments
//! - [`load`]: reader for DBP15k-style directories

pub mod adjacency;
pub mod completion;
pub mod load;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Result type for data operations.
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Which of the two graphs an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The source graph (`sr`).
    Source,
    /// The target graph (`tg`).
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "sr"),
            Side::Target => write!(f, "tg"),
        }
    }
}

/// Maps external ids to dense local ids `0..len`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    external: Vec<u64>,
    names: Vec<String>,
    index: HashMap<u64, usize>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulary of `n` anonymous items whose external id equals the local id.
    pub fn with_len(n: usize) -> Self {
        let mut vocab = Self::new();
        for i in 0..n {
            vocab.insert(i as u64, format!("#{i}"));
        }
        vocab
    }

    /// Register an item and return its local id. Re-inserting an external id
    /// returns the existing local id and keeps the first name.
    pub fn insert(&mut self, external: u64, name: impl Into<String>) -> usize {
        if let Some(&local) = self.index.get(&external) {
            return local;
        }
        let local = self.external.len();
        self.external.push(external);
        self.names.push(name.into());
        self.index.insert(external, local);
        local
    }

    /// Local id of an external id.
    pub fn get(&self, external: u64) -> Option<usize> {
        self.index.get(&external).copied()
    }

    pub fn external(&self, local: usize) -> Option<u64> {
        self.external.get(local).copied()
    }

    pub fn name(&self, local: usize) -> Option<&str> {
        self.names.get(local).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.external.is_empty()
    }
}

/// A `(head, relation, tail)` fact using local ids of one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub head: usize,
    pub relation: usize,
    pub tail: usize,
}

impl Triple {
    pub fn new(head: usize, relation: usize, tail: usize) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }
}

/// One knowledge graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vocabulary,
    pub relations: Vocabulary,
    triples: Vec<Triple>,
}

impl KnowledgeGraph {
    pub fn new(entities: Vocabulary, relations: Vocabulary) -> Self {
        Self {
            entities,
            relations,
            triples: Vec::new(),
        }
    }

    /// Add a triple, validating its ids against the vocabularies.
    pub fn add_triple(&mut self, triple: Triple) -> DataResult<()> {
        if triple.head >= self.entities.len() || triple.tail >= self.entities.len() {
            return Err(DataError::UnknownId {
                kind: "entity",
                id: triple.head.max(triple.tail) as u64,
                context: "triple".into(),
            });
        }
        if triple.relation >= self.relations.len() {
            return Err(DataError::UnknownId {
                kind: "relation",
                id: triple.relation as u64,
                context: "triple".into(),
            });
        }
        self.triples.push(triple);
        Ok(())
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }
}

/// An aligned pair `(source local id, target local id)`.
pub type Pair = (usize, usize);

/// Source and target graphs with their known correspondences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossGraph {
    pub source: KnowledgeGraph,
    pub target: KnowledgeGraph,
    /// Entity pairs used for supervision.
    pub train_pairs: Vec<Pair>,
    /// Held-out entity pairs used for evaluation.
    pub test_pairs: Vec<Pair>,
    /// Known relation correspondences (may be empty).
    pub relation_pairs: Vec<Pair>,
}

impl CrossGraph {
    pub fn graph(&self, side: Side) -> &KnowledgeGraph {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    pub fn graph_mut(&mut self, side: Side) -> &mut KnowledgeGraph {
        match side {
            Side::Source => &mut self.source,
            Side::Target => &mut self.target,
        }
    }

    /// Short human-readable statistics.
    pub fn info(&self) -> String {
        format!(
            "sr: {} entities, {} relations, {} triples | tg: {} entities, {} relations, {} triples | \
             pairs: {} train, {} test, {} relation",
            self.source.num_entities(),
            self.source.num_relations(),
            self.source.triples().len(),
            self.target.num_entities(),
            self.target.num_relations(),
            self.target.triples().len(),
            self.train_pairs.len(),
            self.test_pairs.len(),
            self.relation_pairs.len(),
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_assigns_dense_ids() {
        let mut v = Vocabulary::new();
        assert_eq!(v.insert(10500, "a"), 0);
        assert_eq!(v.insert(10, "b"), 1);
        assert_eq!(v.insert(10500, "dup"), 0);
        assert_eq!(v.len(), 2);
        assert_eq!(v.get(10), Some(1));
        assert_eq!(v.external(0), Some(10500));
        assert_eq!(v.name(0), Some("a"));
        assert_eq!(v.get(11), None);
    }

    #[test]
    fn add_triple_validates_ids() {
        let mut kg = KnowledgeGraph::new(Vocabulary::with_len(2), Vocabulary::with_len(1));
        kg.add_triple(Triple::new(0, 0, 1)).unwrap();
        assert!(matches!(
            kg.add_triple(Triple::new(0, 0, 2)),
            Err(DataError::UnknownId { kind: "entity", .. })
        ));
        assert!(matches!(
            kg.add_triple(Triple::new(0, 3, 1)),
            Err(DataError::UnknownId { kind: "relation", .. })
        ));
        assert_eq!(kg.triples().len(), 1);
    }

    #[test]
    fn fixture_is_consistent() {
        let cg = fixtures::mirrored(6);
        assert_eq!(cg.source.triples().len(), 12);
        assert_eq!(cg.train_pairs.len() + cg.test_pairs.len(), 6);
        assert!(cg.info().contains("3 train"));
    }
}
