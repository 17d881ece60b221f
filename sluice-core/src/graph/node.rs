//! Graph Nodes
//!
//! This module defines the vertices of the pipeline graph.
//!
//! A node owns everything the engine needs to know about one processing
//! step: its unit, its edges (as ids into the owning graph), its cached
//! batch result and dirty flag, and a shared progress record that workers
//! update during a streaming run.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::unit::{Batch, ConfigEntry, SharedUnit};

/// Unique identifier for a node in the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Display coordinate of a node. Both axes are normalised to `[0, 1]`;
/// `y` follows the node's stratum and `x` its place within the stratum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Where a node is in the lifecycle of a streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum NodeState {
    /// No run has touched the node since it was created or reset.
    Idle = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Whether the worker has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Live counters for one node, shared with its worker.
///
/// Observability only: nothing in the engine makes decisions based on
/// these values.
#[derive(Debug)]
pub struct NodeProgress {
    counter: AtomicU64,
    mailbox_depth: AtomicUsize,
    state: AtomicU8,
    failure: Mutex<Option<String>>,
}

impl NodeProgress {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            mailbox_depth: AtomicUsize::new(0),
            state: AtomicU8::new(NodeState::Idle as u8),
            failure: Mutex::new(None),
        }
    }

    /// Items processed or emitted during the current run.
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Undelivered items in the node's mailbox at the last observation.
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox_depth.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mailbox_depth(&self, depth: usize) {
        self.mailbox_depth.store(depth, Ordering::Relaxed);
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Why the worker failed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub(crate) fn fail(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
        self.set_state(NodeState::Failed);
    }

    /// Forget the previous run.
    pub(crate) fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
        self.mailbox_depth.store(0, Ordering::Relaxed);
        *self.failure.lock() = None;
        self.set_state(NodeState::Idle);
    }
}

impl Default for NodeProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// A node in the pipeline graph.
pub struct Node<T> {
    /// Unique identifier for this node.
    id: NodeId,

    /// Unique name within the owning graph. Also the tag this node's items
    /// carry when they arrive at a child.
    name: String,

    /// The transform. Placeholder nodes have none and only ever yield an
    /// empty batch.
    unit: Option<SharedUnit<T>>,

    /// Nodes this node consumes from.
    parents: IndexSet<NodeId>,

    /// Nodes consuming from this node.
    children: IndexSet<NodeId>,

    position: Position,

    notes: Option<String>,

    /// Configuration waiting to be applied on first prerun or run.
    pending_config: Vec<ConfigEntry>,

    /// Cached batch output.
    result: Option<Batch<T>>,

    /// Row cap `result` was computed under; `None` means unlimited.
    result_limit: Option<usize>,

    /// Whether `result` is stale or absent.
    dirty: bool,

    progress: Arc<NodeProgress>,
}

impl<T> Node<T> {
    /// Create a placeholder node with no unit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            unit: None,
            parents: IndexSet::new(),
            children: IndexSet::new(),
            position: Position::default(),
            notes: None,
            pending_config: Vec::new(),
            result: None,
            result_limit: None,
            dirty: true,
            progress: Arc::new(NodeProgress::new()),
        }
    }

    /// Create a node driving `unit`.
    pub fn with_unit(name: impl Into<String>, unit: SharedUnit<T>) -> Self {
        let mut node = Self::new(name);
        node.unit = Some(unit);
        node
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Queue configuration to apply on first prerun or run.
    pub fn with_config(mut self, config: Vec<ConfigEntry>) -> Self {
        self.pending_config = config;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Option<&SharedUnit<T>> {
        self.unit.as_ref()
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    /// Replace the unit. The caller is responsible for invalidating results.
    pub(crate) fn set_unit(&mut self, unit: Option<SharedUnit<T>>) {
        self.unit = unit;
    }

    pub fn parents(&self) -> &IndexSet<NodeId> {
        &self.parents
    }

    pub fn children(&self) -> &IndexSet<NodeId> {
        &self.children
    }

    /// A node without parents.
    pub fn is_source(&self) -> bool {
        self.parents.is_empty()
    }

    /// A node without children.
    pub fn is_sink(&self) -> bool {
        self.children.is_empty()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    pub fn pending_config(&self) -> &[ConfigEntry] {
        &self.pending_config
    }

    pub(crate) fn take_pending_config(&mut self) -> Vec<ConfigEntry> {
        std::mem::take(&mut self.pending_config)
    }

    pub fn result(&self) -> Option<&Batch<T>> {
        self.result.as_ref()
    }

    pub fn result_limit(&self) -> Option<usize> {
        self.result_limit
    }

    pub(crate) fn set_result(&mut self, result: Batch<T>, row_limit: Option<usize>) {
        self.result = Some(result);
        self.result_limit = row_limit;
        self.dirty = false;
    }

    /// Drop the cached result and mark the node dirty.
    pub(crate) fn clear_result(&mut self) {
        self.result = None;
        self.result_limit = None;
        self.dirty = true;
    }

    /// Hand the cached result to a consumer.
    ///
    /// Frozen results are shared. A lazy result can be read once, so it is
    /// moved out and this node is left dirty while its one child stays clean.
    /// This is the only way a clean node can sit below a dirty one: the
    /// child's result was derived from data the parent no longer holds.
    pub(crate) fn take_result_for_consumer(&mut self) -> Option<Batch<T>> {
        if self.result.as_ref()?.is_frozen() {
            return self.result.as_ref().and_then(Batch::share);
        }
        self.result_limit = None;
        self.dirty = true;
        self.result.take()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark only this node dirty. Propagation is the graph's job.
    pub(crate) fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn progress(&self) -> &Arc<NodeProgress> {
        &self.progress
    }

    /// Items processed or emitted during the current run.
    pub fn counter(&self) -> u64 {
        self.progress.counter()
    }

    pub fn mailbox_depth(&self) -> usize {
        self.progress.mailbox_depth()
    }

    pub fn state(&self) -> NodeState {
        self.progress.state()
    }

    pub(crate) fn parents_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.parents
    }

    pub(crate) fn children_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.children
    }
}

impl<T> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_unit", &self.unit.is_some())
            .field("parents", &self.parents)
            .field("children", &self.children)
            .field("position", &self.position)
            .field("dirty", &self.dirty)
            .field("result", &self.result)
            .finish()
    }
}
