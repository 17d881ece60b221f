//! Pipeline Graph
//!
//! The graph is an arena of nodes addressed by [`NodeId`]. It exclusively
//! owns its nodes; the parent/child sets inside each node are plain id sets
//! describing membership, so removing a node never affects its neighbours
//! beyond detaching the shared edges.
//!
//! # Dirty Tracking
//!
//! Every structural change that alters what a node would compute marks it
//! dirty, and dirtiness always flows downstream: when a node is marked dirty
//! every node reachable through its children is marked too. Propagation is
//! iterative with an explicit visited set, so each node is visited at most
//! once and arbitrarily deep graphs are fine.
//!
//! One exception: a node whose lazy result was handed to its only child is
//! dirty while that child stays clean. Marking still walks past dirty
//! nodes, so the child is reached the next time the parent changes.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::node::{Node, NodeId, Position};
use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::unit::{ParameterValue, SharedUnit};

/// A DAG of processing nodes.
pub struct Graph<T> {
    /// All nodes, in insertion order.
    pub(crate) nodes: IndexMap<NodeId, Node<T>>,

    /// Name index.
    names: HashMap<String, NodeId>,

    config: EngineConfig,
}

impl<T> Graph<T> {
    /// Create an empty graph with default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            nodes: IndexMap::new(),
            names: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Add a node to the graph.
    ///
    /// The node joins without edges; wire it with [`Graph::add_parent`].
    pub fn add_node(&mut self, mut node: Node<T>) -> Result<NodeId> {
        if self.names.contains_key(node.name()) {
            return Err(GraphError::DuplicateName(node.name().to_string()));
        }
        node.parents_mut().clear();
        node.children_mut().clear();

        let id = node.id();
        self.names.insert(node.name().to_string(), id);
        self.nodes.insert(id, node);
        tracing::debug!(target: super::TRACING_TARGET, node = %self.nodes[&id].name(), "Added node");
        Ok(id)
    }

    /// Remove a node from the graph.
    ///
    /// Edges are detached from both endpoints first. Former children lost an
    /// input, so they are marked dirty.
    pub fn del_node(&mut self, id: NodeId) -> Result<Node<T>> {
        let (parents, children) = {
            let node = self.require(id)?;
            (node.parents().clone(), node.children().clone())
        };

        for parent in &parents {
            if let Some(parent) = self.nodes.get_mut(parent) {
                parent.children_mut().shift_remove(&id);
            }
        }
        for child in &children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parents_mut().shift_remove(&id);
            }
        }
        for child in &children {
            self.mark_dirty(*child)?;
        }

        let mut node = self.nodes.shift_remove(&id).ok_or(GraphError::UnknownNode(id))?;
        self.names.remove(node.name());
        node.parents_mut().clear();
        node.children_mut().clear();
        tracing::debug!(target: super::TRACING_TARGET, node = %node.name(), "Removed node");
        Ok(node)
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.nodes.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node<T>> {
        self.id_of(name).and_then(|id| self.nodes.get(&id))
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&Node<T>> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    pub(crate) fn require_mut(&mut self, id: NodeId) -> Result<&mut Node<T>> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    /// Look a node up by name, failing if it does not exist.
    pub fn lookup(&self, name: &str) -> Result<NodeId> {
        self.id_of(name)
            .ok_or_else(|| GraphError::UnknownName(name.to_string()))
    }

    /// Iterate over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wire `parent` as an input of `node`, then mark `node` dirty.
    ///
    /// Rejects self loops and edges that would close a cycle.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId) -> Result<()> {
        self.require(parent)?;
        let name = self.require(node)?.name().to_string();
        if node == parent {
            return Err(GraphError::SelfLoop(name));
        }
        if self.is_ancestor_of(node, parent)? {
            return Err(GraphError::Cycle {
                nodes: vec![name, self.nodes[&parent].name().to_string()],
            });
        }

        self.require_mut(node)?.parents_mut().insert(parent);
        self.require_mut(parent)?.children_mut().insert(node);
        self.mark_dirty(node)
    }

    /// Remove `parent` from the inputs of `node`, then mark `node` dirty.
    pub fn del_parent(&mut self, node: NodeId, parent: NodeId) -> Result<()> {
        self.require(parent)?;
        self.require_mut(node)?.parents_mut().shift_remove(&parent);
        self.require_mut(parent)?.children_mut().shift_remove(&node);
        self.mark_dirty(node)
    }

    /// Mark a node and everything downstream of it dirty.
    pub fn mark_dirty(&mut self, id: NodeId) -> Result<()> {
        self.require(id)?;

        let mut visited = HashSet::new();
        let mut stack = vec![id];

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.set_dirty();
                stack.extend(node.children().iter().filter(|c| !visited.contains(*c)));
            }
        }

        Ok(())
    }

    /// Replace a node's unit. Invalidates the node and its descendants.
    pub fn set_unit(&mut self, id: NodeId, unit: Option<SharedUnit<T>>) -> Result<()> {
        let node = self.require_mut(id)?;
        node.set_unit(unit);
        node.clear_result();
        self.mark_dirty(id)
    }

    /// Set one parameter on a node's unit right away, then mark the node dirty.
    ///
    /// Unlike pending configuration, a rejected parameter is returned to the
    /// caller.
    pub fn configure_unit(
        &mut self,
        id: NodeId,
        key_path: &str,
        value: &ParameterValue,
        base_dir: &Path,
    ) -> Result<()> {
        let node = self.require(id)?;
        let unit = node
            .unit()
            .ok_or_else(|| GraphError::MissingUnit(node.name().to_string()))?;
        unit.lock()
            .set_parameter(key_path, value, base_dir)
            .map_err(|source| GraphError::Parameter {
                node: node.name().to_string(),
                source,
            })?;
        self.mark_dirty(id)
    }

    /// Drop every cached result and mark every node dirty.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.clear_result();
            node.progress().reset();
        }
    }

    pub fn set_position(&mut self, id: NodeId, position: Position) -> Result<()> {
        self.require_mut(id)?.set_position(position);
        Ok(())
    }

    /// Ids of every node without parents, in insertion order.
    pub fn sources(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_source())
            .map(Node::id)
            .collect()
    }

    /// Ids of every node without children, in insertion order.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_sink())
            .map(Node::id)
            .collect()
    }

    fn names_of<'a>(&'a self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<String> {
        ids.into_iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| n.name().to_string())
            .collect()
    }

    /// A structural description of the graph, independent of node ids.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self
                .nodes
                .values()
                .map(|node| NodeSnapshot {
                    name: node.name().to_string(),
                    parents: self.names_of(node.parents()),
                    has_unit: node.has_unit(),
                    position: node.position(),
                    dirty: node.is_dirty(),
                    notes: node.notes().map(str::to_string),
                })
                .collect(),
        }
    }

    /// Render the graph in Graphviz `dot` syntax.
    ///
    /// Sources are drawn as `invhouse`, sinks as `house`, everything else as
    /// `box`.
    pub fn to_dot(&self) -> String {
        fn quote(name: &str) -> String {
            format!("\"{}\"", name.replace('"', "\\\""))
        }

        let mut out = String::from("digraph {\n");
        for node in self.nodes.values() {
            let shape = match (node.is_source(), node.is_sink()) {
                (true, false) => "invhouse",
                (false, true) => "house",
                _ => "box",
            };
            out.push_str(&format!("\t{} [ shape=\"{shape}\" ];\n", quote(node.name())));
            for child in self.names_of(node.children()) {
                out.push_str(&format!("\t{} -> {};\n", quote(node.name()), quote(&child)));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.values().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

/// Serializable description of a graph: nodes in insertion order, edges by
/// name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub parents: Vec<String>,
    pub has_unit: bool,
    pub position: Position,
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
