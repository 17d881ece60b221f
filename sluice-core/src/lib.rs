//! Sluice Core
//!
//! This crate provides the graph and scheduling engine for the Sluice
//! data-processing pipeline. It implements:
//!
//! - A DAG of named processing nodes with producer/consumer edges
//! - Dirty tracking and incremental, size-capped previews (`prerun`)
//! - A streaming run over bounded mailboxes, one worker task per node
//! - Topological traversal and an automatic layout
//!
//! What a node actually does with its data is up to its
//! [`ProcessingUnit`]; the engine only moves items between units.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `unit`: The processing-unit contract and batch results
//! - `units`: Small reusable units (sources, maps, folds, sinks)
//! - `graph`: Nodes, edges, dirty tracking, previews and layout
//! - `stream`: Mailboxes, workers and the streaming run
//! - `config`: Engine tuning knobs
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use sluice_core::unit::shared;
//! use sluice_core::units::{FoldUnit, IterSource, MapUnit};
//! use sluice_core::{Graph, Node};
//!
//! let mut graph: Graph<i64> = Graph::new();
//! let numbers = graph.add_node(Node::with_unit("numbers", shared(IterSource::new(vec![1, 2, 3]))))?;
//! let doubled = graph.add_node(Node::with_unit("doubled", shared(MapUnit::new(|x: i64| x * 2))))?;
//!
//! let sum = FoldUnit::new(0, |acc: i64, x: i64| acc + x);
//! let total = sum.output();
//! let sum = graph.add_node(Node::with_unit("sum", shared(sum)))?;
//!
//! graph.add_parent(doubled, numbers)?;
//! graph.add_parent(sum, doubled)?;
//!
//! graph.run()?;
//! assert_eq!(*total.lock(), Some(12));
//! # Ok::<(), sluice_core::GraphError>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod stream;
pub mod unit;
pub mod units;

pub use config::EngineConfig;
pub use error::{ConfigError, GraphError, ParameterError, Result, UnitError};
pub use graph::{Graph, GraphSnapshot, Node, NodeId, NodeSnapshot, NodeState, Position};
pub use stream::{Envelope, Message, NodeOutcome, RunReport};
pub use unit::{Batch, ConfigEntry, Outputs, ParameterValue, ProcessingUnit, Sources, UnitKind};
