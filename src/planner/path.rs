//! Shortest join paths from a root object
//!
//! Layered breadth-first search. Hop count decides first: a node is settled in the
//! layer where it is first reached, so a one-hop path always beats a two-hop path
//! however the weights compare. Within a layer the lowest cumulative `path_weight`
//! wins; equal weights keep the first candidate seen, with frontier nodes visited in
//! object code order and edges in [`RelationGraph::edges_from`] order.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{QueryError, Result};
use crate::graph::RelationGraph;
use crate::metadata::RelationMeta;

#[derive(Debug, Clone)]
struct Reached<'g> {
    via: Option<&'g RelationMeta>,
    hops: usize,
    weight: i64,
}

/// Best path from one root to every reachable object
#[derive(Debug, Clone)]
pub struct ShortestPaths<'g> {
    root: String,
    reached: BTreeMap<String, Reached<'g>>,
}

impl<'g> ShortestPaths<'g> {
    pub fn compute(graph: &'g RelationGraph, root: &str) -> Self {
        let mut reached: BTreeMap<String, Reached<'g>> = BTreeMap::new();
        reached.insert(
            root.to_string(),
            Reached {
                via: None,
                hops: 0,
                weight: 0,
            },
        );

        let mut frontier = vec![root.to_string()];
        let mut hops = 0;

        while !frontier.is_empty() {
            let mut discovered = BTreeSet::new();

            for node in &frontier {
                let base = reached.get(node).map(|r| r.weight).unwrap_or(0);

                for edge in graph.edges_from(node) {
                    let candidate = base + i64::from(edge.path_weight);
                    match reached.get_mut(&edge.to_object) {
                        None => {
                            reached.insert(
                                edge.to_object.clone(),
                                Reached {
                                    via: Some(edge),
                                    hops: hops + 1,
                                    weight: candidate,
                                },
                            );
                            discovered.insert(edge.to_object.clone());
                        }
                        Some(best) if best.hops == hops + 1 && candidate < best.weight => {
                            best.via = Some(edge);
                            best.weight = candidate;
                        }
                        Some(_) => {}
                    }
                }
            }

            frontier = discovered.into_iter().collect();
            hops += 1;
        }

        Self {
            root: root.to_string(),
            reached,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_reachable(&self, object_code: &str) -> bool {
        self.reached.contains_key(object_code)
    }

    /// (hops, cumulative weight) of the best path, if reachable
    pub fn cost(&self, object_code: &str) -> Option<(usize, i64)> {
        self.reached.get(object_code).map(|r| (r.hops, r.weight))
    }

    /// Relations to follow from the root to `target`, in order; empty for the root itself
    pub fn path_to(&self, target: &str) -> Result<Vec<&'g RelationMeta>> {
        let mut current = self
            .reached
            .get(target)
            .ok_or_else(|| QueryError::no_path(&self.root, target))?;

        let mut path = Vec::with_capacity(current.hops);
        while let Some(edge) = current.via {
            path.push(edge);
            current = self.reached.get(&edge.from_object).ok_or_else(|| {
                QueryError::CyclicOrUnreachablePlan(format!(
                    "Predecessor '{}' of '{}' was never reached",
                    edge.from_object, edge.to_object
                ))
            })?;
            if path.len() > self.reached.len() {
                return Err(QueryError::CyclicOrUnreachablePlan(format!(
                    "Predecessor chain of '{}' does not lead back to '{}'",
                    target, self.root
                )));
            }
        }

        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{JoinKey, RelationType};

    fn rel(code: &str, from: &str, to: &str, weight: i32) -> RelationMeta {
        RelationMeta::new(
            code,
            from,
            to,
            RelationType::ManyToOne,
            vec![JoinKey::eq("k", "id")],
        )
        .weight(weight)
    }

    fn codes(path: &[&RelationMeta]) -> Vec<String> {
        path.iter().map(|r| r.relation_code.clone()).collect()
    }

    #[test]
    fn test_one_hop_beats_two_hops_regardless_of_weight() {
        let relations = vec![
            rel("a_b", "a", "b", 1),
            rel("b_c", "b", "c", 1),
            rel("a_c", "a", "c", 100),
        ];
        let graph = RelationGraph::build(&relations);
        let paths = ShortestPaths::compute(&graph, "a");

        assert_eq!(codes(&paths.path_to("c").unwrap()), vec!["a_c"]);
        assert_eq!(paths.cost("c"), Some((1, 100)));
    }

    #[test]
    fn test_lower_weight_wins_among_equal_hops() {
        let relations = vec![
            rel("a_b", "a", "b", 5),
            rel("a_x", "a", "x", 1),
            rel("b_c", "b", "c", 1),
            rel("x_c", "x", "c", 1),
        ];
        let graph = RelationGraph::build(&relations);
        let paths = ShortestPaths::compute(&graph, "a");

        assert_eq!(codes(&paths.path_to("c").unwrap()), vec!["a_x", "x_c"]);
        assert_eq!(paths.cost("c"), Some((2, 2)));
    }

    #[test]
    fn test_equal_cost_tie_broken_by_relation_code() {
        let relations = vec![
            rel("z_rel", "a", "b", 1),
            rel("m_rel", "a", "b", 1),
        ];
        let graph = RelationGraph::build(&relations);
        let paths = ShortestPaths::compute(&graph, "a");

        assert_eq!(codes(&paths.path_to("b").unwrap()), vec!["m_rel"]);
    }

    #[test]
    fn test_root_has_empty_path() {
        let graph = RelationGraph::build(&[]);
        let paths = ShortestPaths::compute(&graph, "a");
        assert!(paths.path_to("a").unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_target() {
        let relations = vec![rel("a_b", "a", "b", 1), rel("c_a", "c", "a", 1)];
        let graph = RelationGraph::build(&relations);
        let paths = ShortestPaths::compute(&graph, "a");

        assert!(!paths.is_reachable("c"));
        let err = paths.path_to("c").unwrap_err();
        assert!(matches!(
            err,
            QueryError::NoPath { ref from, ref to } if from == "a" && to == "c"
        ));
    }

    #[test]
    fn test_cycles_terminate() {
        let relations = vec![rel("a_b", "a", "b", 1), rel("b_a", "b", "a", 1)];
        let graph = RelationGraph::build(&relations);
        let paths = ShortestPaths::compute(&graph, "a");

        assert_eq!(codes(&paths.path_to("b").unwrap()), vec!["a_b"]);
        assert!(paths.path_to("a").unwrap().is_empty());
    }

    fn hand_built<'g>(entries: &[(&str, Option<&'g RelationMeta>, usize)]) -> ShortestPaths<'g> {
        ShortestPaths {
            root: "r".to_string(),
            reached: entries
                .iter()
                .map(|(object, via, hops)| {
                    let reached = Reached {
                        via: *via,
                        hops: *hops,
                        weight: *hops as i64,
                    };
                    (object.to_string(), reached)
                })
                .collect(),
        }
    }

    #[test]
    fn test_missing_predecessor_is_cyclic_or_unreachable() {
        let orphan = rel("x_b", "x", "b", 1);
        let paths = hand_built(&[("r", None, 0), ("b", Some(&orphan), 1)]);

        let err = paths.path_to("b").unwrap_err();
        assert!(matches!(
            err,
            QueryError::CyclicOrUnreachablePlan(ref msg) if msg.contains("'x'")
        ));
    }

    #[test]
    fn test_looping_predecessors_are_cyclic_or_unreachable() {
        let a_b = rel("a_b", "a", "b", 1);
        let b_a = rel("b_a", "b", "a", 1);
        let paths = hand_built(&[("r", None, 0), ("a", Some(&b_a), 1), ("b", Some(&a_b), 1)]);

        assert!(matches!(
            paths.path_to("a"),
            Err(QueryError::CyclicOrUnreachablePlan(_))
        ));
        assert!(paths.path_to("r").unwrap().is_empty());
    }
}
