//! Relation graph over catalog objects
//!
//! Built once per catalog snapshot from navigable relations and shared read-only by
//! every request planned against that snapshot.

use std::collections::BTreeMap;

use crate::metadata::RelationMeta;

/// Adjacency list keyed by `from_object`
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    edges: BTreeMap<String, Vec<RelationMeta>>,
}

impl RelationGraph {
    /// Build the graph from a catalog's relations, skipping non-navigable ones
    pub fn build<'a>(relations: impl IntoIterator<Item = &'a RelationMeta>) -> Self {
        let mut edges: BTreeMap<String, Vec<RelationMeta>> = BTreeMap::new();

        for relation in relations.into_iter().filter(|r| r.navigable) {
            edges
                .entry(relation.from_object.clone())
                .or_default()
                .push(relation.clone());
        }

        for outgoing in edges.values_mut() {
            outgoing.sort_by(|a, b| {
                a.path_weight
                    .cmp(&b.path_weight)
                    .then_with(|| a.relation_code.cmp(&b.relation_code))
            });
        }

        Self { edges }
    }

    /// Outgoing edges ordered by (path weight, relation code)
    pub fn edges_from(&self, object_code: &str) -> &[RelationMeta] {
        self.edges
            .get(object_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}
