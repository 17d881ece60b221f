//! Topological Traversal
//!
//! Orders nodes so that every node comes strictly after all of its parents
//! (forward) or strictly after all of its children (backward).
//!
//! # Algorithm
//!
//! 1. Start from the frontier: every node with an empty relevant set (no
//!    parents going forward, no children going backward), in insertion order.
//! 2. Scan the node list in insertion order for unvisited nodes whose whole
//!    relevant set has been visited; visit them.
//! 3. Repeat until every node is visited.
//!
//! A scan that visits nothing means the remaining nodes sit on a cycle, and
//! the traversal fails with [`GraphError::Cycle`] instead of spinning.
//!
//! The same module answers ancestry questions with iterative searches.

use std::collections::HashSet;

use indexmap::IndexSet;

use super::node::{Node, NodeId};
use super::pipeline::Graph;
use crate::error::{GraphError, Result};

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn upstream<T>(self, node: &Node<T>) -> &IndexSet<NodeId> {
        match self {
            Self::Forward => node.parents(),
            Self::Backward => node.children(),
        }
    }
}

impl<T> Graph<T> {
    /// Every node, each strictly after all of its parents.
    pub fn traverse_forward(&self) -> Result<Vec<NodeId>> {
        self.traverse(Direction::Forward)
    }

    /// Every node, each strictly after all of its children.
    pub fn traverse_backward(&self) -> Result<Vec<NodeId>> {
        self.traverse(Direction::Backward)
    }

    fn traverse(&self, direction: Direction) -> Result<Vec<NodeId>> {
        let mut visited: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());

        for (id, node) in &self.nodes {
            if direction.upstream(node).is_empty() {
                visited.insert(*id);
                order.push(*id);
            }
        }

        while order.len() < self.nodes.len() {
            let before = order.len();
            for (id, node) in &self.nodes {
                if !visited.contains(id)
                    && direction.upstream(node).iter().all(|n| visited.contains(n))
                {
                    visited.insert(*id);
                    order.push(*id);
                }
            }

            if order.len() == before {
                let nodes = self
                    .nodes
                    .values()
                    .filter(|n| !visited.contains(&n.id()))
                    .map(|n| n.name().to_string())
                    .collect();
                return Err(GraphError::Cycle { nodes });
            }
        }

        Ok(order)
    }

    /// Collect every node reachable from `start` (excluding `start` itself)
    /// by repeatedly following `next`.
    fn reachable<'a, F>(&'a self, start: NodeId, next: F) -> Result<HashSet<NodeId>>
    where
        F: Fn(&'a Node<T>) -> &'a IndexSet<NodeId>,
    {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = next(self.require(start)?).iter().copied().collect();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(next(node).iter().filter(|n| !seen.contains(*n)));
            }
        }

        Ok(seen)
    }

    /// Whether `ancestor` feeds, directly or indirectly, into `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        self.require(ancestor)?;
        Ok(self.reachable(node, Node::parents)?.contains(&ancestor))
    }

    /// Whether `descendant` consumes, directly or indirectly, from `node`.
    pub fn is_descendant_of(&self, descendant: NodeId, node: NodeId) -> Result<bool> {
        self.require(descendant)?;
        Ok(self.reachable(node, Node::children)?.contains(&descendant))
    }

    /// Every ancestor of `id`, upstream first.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let ancestors = self.reachable(id, Node::parents)?;
        Ok(self
            .traverse_forward()?
            .into_iter()
            .filter(|n| ancestors.contains(n))
            .collect())
    }

    /// The sinks fed by `id`: the node itself if it has no children.
    pub fn final_descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        if self.require(id)?.is_sink() {
            return Ok(vec![id]);
        }
        let reachable = self.reachable(id, Node::children)?;
        Ok(self
            .nodes
            .values()
            .filter(|n| n.is_sink() && reachable.contains(&n.id()))
            .map(Node::id)
            .collect())
    }

    /// Whether some parent of `id` feeds more than one child.
    pub fn has_sibling(&self, id: NodeId) -> Result<bool> {
        Ok(self
            .require(id)?
            .parents()
            .iter()
            .filter_map(|p| self.nodes.get(p))
            .any(|p| p.children().len() > 1))
    }
}
