//! Incremental Evaluation
//!
//! Batch evaluation of nodes, used for interactive previews.
//!
//! # How It Works
//!
//! 1. `execute_node` runs one node's unit over its parents' cached results
//!    and caches the output.
//!
//! 2. `prerun_node` brings a node up to date: it walks upstream through
//!    dirty nodes that have a unit, then executes them parents-first, with a
//!    row cap so previews stay cheap.
//!
//! 3. Clean nodes are never recomputed. A node's cached result is reused as
//!    long as it covers the requested row limit.
//!
//! # Sharing Results
//!
//! A unit's output is a lazy, single-use sequence. It is frozen into an
//! immutable slice whenever it is row-limited or the node does not have
//! exactly one child, so several consumers can read it independently. With
//! exactly one child and no limit the lazy sequence is handed over as is.
//!
//! Pending configuration is applied here, once, before a node's first
//! evaluation. Unknown keys and invalid values are logged and skipped.

use std::collections::HashSet;

use super::node::NodeId;
use super::pipeline::Graph;
use super::TRACING_TARGET;
use crate::error::{GraphError, Result};
use crate::unit::{Batch, Sources};

impl<T> Graph<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Apply a node's pending configuration to its unit, once.
    ///
    /// Rejected entries are logged as warnings; the unit keeps its previous
    /// value for them. Placeholder nodes keep their configuration until they
    /// get a unit.
    pub fn load_config(&mut self, id: NodeId) -> Result<()> {
        let node = self.require_mut(id)?;
        let Some(unit) = node.unit().cloned() else {
            return Ok(());
        };

        let entries = node.take_pending_config();
        if entries.is_empty() {
            return Ok(());
        }

        let mut unit = unit.lock();
        for entry in entries {
            if let Err(err) = unit.set_parameter(&entry.key_path, &entry.value, &entry.base_dir) {
                tracing::warn!(
                    target: TRACING_TARGET,
                    node = %node.name(),
                    key = %entry.key_path,
                    value = %entry.value,
                    error = %err,
                    "Ignoring parameter"
                );
            }
        }

        Ok(())
    }

    /// Run one node's unit in batch mode over its parents' results.
    ///
    /// Does nothing if the node is clean and its cached result covers
    /// `row_limit`. Parents without a result are left out of the sources.
    pub fn execute_node(&mut self, id: NodeId, row_limit: Option<usize>) -> Result<()> {
        let node = self.require(id)?;

        // A placeholder yields nothing and stays dirty until it gets a unit.
        let Some(unit) = node.unit().cloned() else {
            let node = self.require_mut(id)?;
            node.set_result(Batch::empty(), row_limit);
            node.set_dirty();
            return Ok(());
        };

        if !node.is_dirty() && node.result().is_some() && covers(node.result_limit(), row_limit) {
            return Ok(());
        }

        let name = node.name().to_string();
        let freeze = row_limit.is_some() || node.children().len() != 1;
        let parents: Vec<NodeId> = node.parents().iter().copied().collect();

        let mut sources = Sources::new();
        for parent_id in parents {
            let parent = self.require_mut(parent_id)?;
            match parent.take_result_for_consumer() {
                Some(batch) => {
                    sources.insert(parent.name().to_string(), batch);
                }
                None => tracing::debug!(
                    target: TRACING_TARGET,
                    node = %name,
                    parent = %parent.name(),
                    "Parent has no result"
                ),
            }
        }

        let output = unit
            .lock()
            .execute(&name, sources, row_limit)
            .map_err(|source| GraphError::Unit {
                node: name.clone(),
                source,
            })?;

        let result = match (freeze, row_limit) {
            (true, Some(limit)) => Batch::frozen(output.take(limit).collect::<Vec<_>>()),
            (true, None) => Batch::frozen(output.collect::<Vec<_>>()),
            (false, _) => Batch::Lazy(output),
        };

        tracing::trace!(target: TRACING_TARGET, node = %name, ?result, "Executed node");
        self.require_mut(id)?.set_result(result, row_limit);
        Ok(())
    }

    /// Bring a node up to date with the configured preview cap.
    pub fn prerun_node(&mut self, id: NodeId) -> Result<()> {
        let limit = self.config().prerun_row_limit;
        self.prerun_node_with_limit(id, limit)
    }

    /// Bring a node up to date, capping every evaluation at `row_limit`.
    ///
    /// Only dirty nodes with a unit are evaluated; upstream evaluation stops
    /// at clean nodes and placeholders. Runs synchronously on the caller's
    /// thread.
    pub fn prerun_node_with_limit(&mut self, id: NodeId, row_limit: usize) -> Result<()> {
        if !self.needs_prerun(id)? {
            return Ok(());
        }

        let mut plan = HashSet::new();
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            if !plan.insert(node_id) {
                continue;
            }
            for parent in self.require(node_id)?.parents() {
                if !plan.contains(parent) && self.needs_prerun(*parent)? {
                    stack.push(*parent);
                }
            }
        }

        for node_id in self.traverse_forward()? {
            if plan.contains(&node_id) {
                self.prerun_one(node_id, row_limit)?;
            }
        }
        Ok(())
    }

    /// Preview the whole graph with the configured cap.
    pub fn prerun(&mut self) -> Result<()> {
        let limit = self.config().prerun_row_limit;
        self.prerun_with_limit(limit)
    }

    /// Preview the whole graph, parents before children.
    pub fn prerun_with_limit(&mut self, row_limit: usize) -> Result<()> {
        for id in self.traverse_forward()? {
            if self.needs_prerun(id)? {
                self.prerun_one(id, row_limit)?;
            }
        }
        Ok(())
    }

    fn needs_prerun(&self, id: NodeId) -> Result<bool> {
        let node = self.require(id)?;
        Ok(node.is_dirty() && node.has_unit())
    }

    fn prerun_one(&mut self, id: NodeId, row_limit: usize) -> Result<()> {
        self.load_config(id)?;
        self.execute_node(id, Some(row_limit))
    }
}

/// Whether a result computed under `cached` can serve a request for
/// `requested` rows.
fn covers(cached: Option<usize>, requested: Option<usize>) -> bool {
    match (cached, requested) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(cached), Some(requested)) => cached >= requested,
    }
}
