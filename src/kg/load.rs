//! Reader for DBP15k-style alignment directories.
//!
//! Expected files, all tab-separated UTF-8:
//!
//! | file | line format |
//! |---|---|
//! | `ent_ids_1`, `ent_ids_2` | `id<TAB>name` |
//! | `rel_ids_1`, `rel_ids_2` | `id<TAB>name` |
//! | `triples_1`, `triples_2` | `head<TAB>relation<TAB>tail` |
//! | `ref_ent_ids` | `source_id<TAB>target_id` |
//! | `ref_rel_ids` (optional) | `source_id<TAB>target_id` |
//!
//! External ids may be arbitrary (DBP15k numbers the second graph after the
//! first); they are remapped to dense local ids per graph.

use std::path::Path;

use rand::SeedableRng;
use rand::seq::SliceRandom;

use super::{CrossGraph, DataResult, KnowledgeGraph, Pair, Triple, Vocabulary};
use crate::error::DataError;

fn read_lines(path: &Path) -> DataResult<Vec<(usize, String)>> {
    let content = std::fs::read_to_string(path).map_err(|e| DataError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, l.to_string()))
        .collect())
}

fn parse_id(path: &Path, line: usize, field: &str) -> DataResult<u64> {
    field.trim().parse().map_err(|_| DataError::Parse {
        path: path.display().to_string(),
        line,
        message: format!("expected a numeric id, found {field:?}"),
    })
}

fn fields<'a>(path: &Path, line: usize, text: &'a str, n: usize) -> DataResult<Vec<&'a str>> {
    let parts: Vec<&str> = text.split('\t').collect();
    if parts.len() < n {
        return Err(DataError::Parse {
            path: path.display().to_string(),
            line,
            message: format!("expected {n} tab-separated fields, found {}", parts.len()),
        });
    }
    Ok(parts)
}

/// Read an `id<TAB>name` file. A missing name column is allowed.
pub fn read_vocabulary(path: &Path) -> DataResult<Vocabulary> {
    let mut vocab = Vocabulary::new();
    for (line, text) in read_lines(path)? {
        let parts = fields(path, line, &text, 1)?;
        let id = parse_id(path, line, parts[0])?;
        let name = parts.get(1).copied().unwrap_or_default();
        vocab.insert(id, name);
    }
    Ok(vocab)
}

/// Read a triple file against already loaded vocabularies.
pub fn read_triples(path: &Path, graph: &mut KnowledgeGraph) -> DataResult<()> {
    let context = path.display().to_string();
    for (line, text) in read_lines(path)? {
        let parts = fields(path, line, &text, 3)?;
        let h = parse_id(path, line, parts[0])?;
        let r = parse_id(path, line, parts[1])?;
        let t = parse_id(path, line, parts[2])?;
        let lookup_entity = |id| {
            graph.entities.get(id).ok_or_else(|| DataError::UnknownId {
                kind: "entity",
                id,
                context: format!("{context}:{line}"),
            })
        };
        let head = lookup_entity(h)?;
        let tail = lookup_entity(t)?;
        let relation = graph.relations.get(r).ok_or_else(|| DataError::UnknownId {
            kind: "relation",
            id: r,
            context: format!("{context}:{line}"),
        })?;
        graph.add_triple(Triple::new(head, relation, tail))?;
    }
    Ok(())
}

/// Read an alignment file into local id pairs.
pub fn read_pairs(path: &Path, source: &Vocabulary, target: &Vocabulary) -> DataResult<Vec<Pair>> {
    let context = path.display().to_string();
    let mut pairs = Vec::new();
    for (line, text) in read_lines(path)? {
        let parts = fields(path, line, &text, 2)?;
        let s = parse_id(path, line, parts[0])?;
        let t = parse_id(path, line, parts[1])?;
        let missing = |id| DataError::UnknownId {
            kind: "aligned",
            id,
            context: format!("{context}:{line}"),
        };
        let s = source.get(s).ok_or_else(|| missing(s))?;
        let t = target.get(t).ok_or_else(|| missing(t))?;
        pairs.push((s, t));
    }
    Ok(pairs)
}

/// Load a full cross-graph data set from `dir`.
///
/// `ref_ent_ids` is shuffled with `seed` and the first `train_ratio` share
/// becomes the seed alignment; the rest is held out for evaluation.
pub fn load_cross_graph(dir: &Path, train_ratio: f32, seed: u64) -> DataResult<CrossGraph> {
    let mut source = KnowledgeGraph::new(
        read_vocabulary(&dir.join("ent_ids_1"))?,
        read_vocabulary(&dir.join("rel_ids_1"))?,
    );
    let mut target = KnowledgeGraph::new(
        read_vocabulary(&dir.join("ent_ids_2"))?,
        read_vocabulary(&dir.join("rel_ids_2"))?,
    );
    read_triples(&dir.join("triples_1"), &mut source)?;
    read_triples(&dir.join("triples_2"), &mut target)?;

    let mut pairs = read_pairs(&dir.join("ref_ent_ids"), &source.entities, &target.entities)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    pairs.shuffle(&mut rng);
    let n_train = ((pairs.len() as f64) * f64::from(train_ratio)).round() as usize;
    let test_pairs = pairs.split_off(n_train.min(pairs.len()));
    if pairs.is_empty() {
        return Err(DataError::NoSeeds);
    }

    let rel_path = dir.join("ref_rel_ids");
    let relation_pairs = if rel_path.exists() {
        read_pairs(&rel_path, &source.relations, &target.relations)?
    } else {
        Vec::new()
    };

    let cg = CrossGraph {
        source,
        target,
        train_pairs: pairs,
        test_pairs,
        relation_pairs,
    };
    tracing::info!(dir = %dir.display(), "{}", cg.info());
    Ok(cg)
}
