//! Automatic Layout
//!
//! `tidy` assigns every node a position in the unit square, one horizontal
//! band per stratum.
//!
//! # Algorithm
//!
//! 1. Strata from a forward traversal: sources get 0, every other node one
//!    more than its deepest parent.
//! 2. Walking that order in reverse, nodes are pulled towards their
//!    consumers to shorten long edges. A source with children moves to just
//!    above its shallowest child; a node with parents and children moves
//!    halfway between its deepest parent and its shallowest child.
//! 3. Within a stratum nodes are ordered by the average `x` of their parents
//!    (0.5 without parents), then by their current `x` so a user's ordering
//!    of branches survives, then by insertion order. They are then spread
//!    evenly across the band.
//!
//! The result only depends on insertion order and prior positions.

use std::collections::{BTreeMap, HashMap};

use super::node::{NodeId, Position};
use super::pipeline::Graph;
use crate::error::Result;

impl<T> Graph<T> {
    /// Recompute every node's position.
    pub fn tidy(&mut self) -> Result<()> {
        let order = self.traverse_forward()?;
        if order.is_empty() {
            return Ok(());
        }

        let strata = self.strata(&order);
        let max_stratum = strata.values().copied().max().unwrap_or(0);

        let mut bands: BTreeMap<i64, Vec<NodeId>> = BTreeMap::new();
        for id in &order {
            bands.entry(strata[id]).or_default().push(*id);
        }

        let mut placed: HashMap<NodeId, f64> = HashMap::with_capacity(order.len());
        for (stratum, members) in bands {
            let mut keyed: Vec<(f64, f64, usize, NodeId)> = members
                .into_iter()
                .map(|id| {
                    let node = &self.nodes[&id];
                    let pull = if node.is_source() {
                        0.5
                    } else {
                        let total: f64 = node
                            .parents()
                            .iter()
                            .map(|p| {
                                placed
                                    .get(p)
                                    .copied()
                                    .unwrap_or_else(|| self.nodes[p].position().x)
                            })
                            .sum();
                        total / node.parents().len() as f64
                    };
                    let index = self.nodes.get_index_of(&id).unwrap_or(usize::MAX);
                    (pull, node.position().x, index, id)
                })
                .collect();

            keyed.sort_by(|a, b| {
                a.0.total_cmp(&b.0)
                    .then_with(|| a.1.total_cmp(&b.1))
                    .then_with(|| a.2.cmp(&b.2))
            });

            let count = keyed.len() as f64;
            let y = (stratum as f64 + 0.5) / (max_stratum as f64 + 1.0);
            for (slot, (_, _, _, id)) in keyed.into_iter().enumerate() {
                let x = (slot as f64 + 0.5) / count;
                placed.insert(id, x);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.set_position(Position::new(x, y));
                }
            }
        }

        tracing::debug!(target: super::TRACING_TARGET, nodes = order.len(), max_stratum, "Tidied layout");
        Ok(())
    }

    /// Layout depth of every node, given a forward traversal order.
    pub fn strata(&self, order: &[NodeId]) -> HashMap<NodeId, i64> {
        let mut stratum: HashMap<NodeId, i64> = HashMap::with_capacity(order.len());

        for id in order {
            let node = &self.nodes[id];
            let depth = node
                .parents()
                .iter()
                .filter_map(|p| stratum.get(p))
                .max()
                .map_or(0, |deepest| deepest + 1);
            stratum.insert(*id, depth);
        }

        for id in order.iter().rev() {
            let node = &self.nodes[id];
            let Some(shallowest_child) = node.children().iter().filter_map(|c| stratum.get(c)).min().copied()
            else {
                continue;
            };
            let depth = match node.parents().iter().filter_map(|p| stratum.get(p)).max() {
                None => shallowest_child - 1,
                Some(deepest_parent) => (shallowest_child + deepest_parent).div_euclid(2),
            };
            stratum.insert(*id, depth);
        }

        stratum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::Node;

    fn add(graph: &mut Graph<()>, name: &str) -> NodeId {
        graph.add_node(Node::new(name)).unwrap()
    }

    #[test]
    fn diamond_strata_and_spacing() {
        let mut graph = Graph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let c = add(&mut graph, "c");
        let d = add(&mut graph, "d");
        graph.add_parent(b, a).unwrap();
        graph.add_parent(c, a).unwrap();
        graph.add_parent(d, b).unwrap();
        graph.add_parent(d, c).unwrap();

        let order = graph.traverse_forward().unwrap();
        let strata = graph.strata(&order);
        assert_eq!(strata[&a], 0);
        assert_eq!(strata[&b], 1);
        assert_eq!(strata[&c], 1);
        assert_eq!(strata[&d], 2);

        graph.tidy().unwrap();
        let pos = |id| graph.node(id).unwrap().position();

        assert_ne!(pos(b).x, pos(c).x);
        assert_eq!(pos(b).y, pos(c).y);
        assert_eq!(pos(a), Position::new(0.5, 0.5 / 3.0));
        assert_eq!(pos(d), Position::new(0.5, 2.5 / 3.0));
        assert_eq!(pos(b).x, 0.25);
        assert_eq!(pos(c).x, 0.75);
    }

    #[test]
    fn late_sources_are_pulled_towards_their_consumers() {
        // a -> b -> c -> d, and a lone source e feeding d.
        let mut graph = Graph::new();
        let a = add(&mut graph, "a");
        let b = add(&mut graph, "b");
        let c = add(&mut graph, "c");
        let d = add(&mut graph, "d");
        let e = add(&mut graph, "e");
        graph.add_parent(b, a).unwrap();
        graph.add_parent(c, b).unwrap();
        graph.add_parent(d, c).unwrap();
        graph.add_parent(d, e).unwrap();

        let order = graph.traverse_forward().unwrap();
        let strata = graph.strata(&order);
        assert_eq!(strata[&d], 3);
        assert_eq!(strata[&e], 2);
        assert_eq!(strata[&c], 2);
    }

    #[test]
    fn interior_nodes_sit_between_parent_and_child() {
        // a -> b -> c -> d -> e: nothing moves on the chain.
        // x -> y -> e with x a source: y moves halfway between x and e.
        let mut graph = Graph::new();
        let names = ["a", "b", "c", "d", "e", "x", "y"];
        let ids: Vec<_> = names.iter().map(|n| add(&mut graph, n)).collect();
        let id = |name: &str| ids[names.iter().position(|n| *n == name).unwrap()];
        for (child, parent) in [("b", "a"), ("c", "b"), ("d", "c"), ("e", "d"), ("y", "x"), ("e", "y")] {
            graph.add_parent(id(child), id(parent)).unwrap();
        }

        let order = graph.traverse_forward().unwrap();
        let strata = graph.strata(&order);
        assert_eq!(strata[&id("e")], 4);
        assert_eq!(strata[&id("y")], 2);
        assert_eq!(strata[&id("x")], 1);
    }

    #[test]
    fn ties_keep_the_current_ordering() {
        let mut graph: Graph<()> = Graph::new();
        let left = graph
            .add_node(Node::new("left").at(Position::new(0.9, 0.0)))
            .unwrap();
        let right = graph
            .add_node(Node::new("right").at(Position::new(0.1, 0.0)))
            .unwrap();

        graph.tidy().unwrap();

        // "right" sat further left, so it keeps the left slot.
        assert_eq!(graph.node(right).unwrap().position().x, 0.25);
        assert_eq!(graph.node(left).unwrap().position().x, 0.75);

        // Tidy is a fixed point.
        let before = graph.snapshot();
        graph.tidy().unwrap();
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn tidy_on_empty_graph_is_a_no_op() {
        let mut graph: Graph<()> = Graph::new();
        assert!(graph.tidy().is_ok());
    }
}
