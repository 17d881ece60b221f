//! Pipeline Graph
//!
//! This module implements the graph of processing nodes and everything that
//! can be done to it synchronously.
//!
//! # Overview
//!
//! The pipeline is a directed acyclic graph (DAG) where:
//!
//! - Nodes wrap a processing unit plus their cached result and counters
//! - Edges run from producer to consumer: if B reads A's output, A is a
//!   parent of B and B a child of A
//!
//! When a node changes (new edge, new parameter, new unit), it and every
//! node downstream of it are marked dirty. Previews then recompute only the
//! dirty nodes they need.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena keyed by [`NodeId`] rather than pointing at
//!    each other. Edges are id sets, which keeps ownership simple and lets a
//!    graph be compared and serialized independently of node identity.
//!
//! 2. The arena keeps insertion order, so traversal, layout and reporting
//!    are deterministic.
//!
//! 3. Both directions of every edge are stored to allow cheap traversal
//!    upstream and downstream.
//!
//! 4. Cycles are rejected when an edge is added, and traversal reports a
//!    cycle instead of looping if one is ever present.

mod eval;
mod layout;
mod node;
mod pipeline;
mod traversal;

pub use node::{Node, NodeId, NodeProgress, NodeState, Position};
pub use pipeline::{Graph, GraphSnapshot, NodeSnapshot};

/// Tracing target for graph operations.
pub(crate) const TRACING_TARGET: &str = "sluice_core::graph";
