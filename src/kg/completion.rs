//! Cross-graph completion: copy triples between graphs through alignments.
//!
//! A triple of one graph whose head, relation and tail all have a known
//! counterpart is rewritten into the other graph's ids and added there if the
//! other graph does not already contain it. Both graphs are completed from the
//! *original* triples of the opposite side, so the result does not depend on
//! the order of the two passes.

use std::collections::{HashMap, HashSet};

use super::{CrossGraph, Pair, Side, Triple};

/// Number of triples added to each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    pub added_source: usize,
    pub added_target: usize,
}

fn transfer(
    from: &[Triple],
    into: &HashSet<Triple>,
    entities: &HashMap<usize, usize>,
    relations: &HashMap<usize, usize>,
) -> Vec<Triple> {
    let mut seen = HashSet::new();
    from.iter()
        .filter_map(|t| {
            Some(Triple::new(
                *entities.get(&t.head)?,
                *relations.get(&t.relation)?,
                *entities.get(&t.tail)?,
            ))
        })
        .filter(|t| !into.contains(t) && seen.insert(*t))
        .collect()
}

fn forward_map(pairs: &[Pair]) -> HashMap<usize, usize> {
    pairs.iter().copied().collect()
}

fn backward_map(pairs: &[Pair]) -> HashMap<usize, usize> {
    pairs.iter().map(|&(s, t)| (t, s)).collect()
}

/// Complete both graphs of `cg` using its train entity pairs and relation pairs.
pub fn complete(cg: &mut CrossGraph) -> CompletionStats {
    let source_set: HashSet<Triple> = cg.source.triples().iter().copied().collect();
    let target_set: HashSet<Triple> = cg.target.triples().iter().copied().collect();

    let to_target = transfer(
        cg.source.triples(),
        &target_set,
        &forward_map(&cg.train_pairs),
        &forward_map(&cg.relation_pairs),
    );
    let to_source = transfer(
        cg.target.triples(),
        &source_set,
        &backward_map(&cg.train_pairs),
        &backward_map(&cg.relation_pairs),
    );

    let stats = CompletionStats {
        added_source: to_source.len(),
        added_target: to_target.len(),
    };
    for (side, triples) in [(Side::Source, to_source), (Side::Target, to_target)] {
        let graph = cg.graph_mut(side);
        for t in triples {
            // Ids come from the other graph's alignment maps, which only name
            // entities and relations of this graph.
            if let Err(e) = graph.add_triple(t) {
                tracing::warn!(%side, "skipping completed triple: {e}");
            }
        }
    }
    tracing::info!(
        added_sr = stats.added_source,
        added_tg = stats.added_target,
        "cross-graph completion"
    );
    stats
}
