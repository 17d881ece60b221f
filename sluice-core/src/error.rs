//! Error Types
//!
//! Every fallible operation in the engine returns one of the enums below.
//!
//! - [`GraphError`] is what the controller sees: structural problems
//!   (unknown nodes, cycles, missing units) and failures bubbling out of a
//!   unit during evaluation or a streaming run.
//! - [`UnitError`] is what a processing unit returns from its callbacks.
//! - [`ParameterError`] is the recoverable configuration failure raised by
//!   `set_parameter`. The engine demotes it to a warning when applying a
//!   node's pending configuration.
//! - [`ConfigError`] covers the engine's own settings.

use thiserror::Error;

use crate::graph::NodeId;
use crate::stream::RunReport;

/// Result alias used throughout the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;

/// Errors raised by graph operations and runs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The node id does not belong to this graph.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// No node carries the given name.
    #[error("no node named {0:?}")]
    UnknownName(String),

    /// Node names are unique within a graph.
    #[error("a node named {0:?} already exists")]
    DuplicateName(String),

    /// A node was wired as its own parent.
    #[error("node {0:?} cannot be its own parent")]
    SelfLoop(String),

    /// The edge set contains (or would contain) a cycle.
    #[error("graph contains a cycle through {nodes:?}")]
    Cycle {
        /// Names of the nodes that could not be ordered.
        nodes: Vec<String>,
    },

    /// A placeholder node cannot take part in a streaming run.
    #[error("node {0:?} has no processing unit")]
    MissingUnit(String),

    /// A unit rejected the way it is wired, before anything ran.
    #[error("node {node:?} rejects its inputs: {source}")]
    IncompatibleInputs {
        node: String,
        #[source]
        source: UnitError,
    },

    /// A unit callback failed during batch evaluation.
    #[error("unit of node {node:?} failed: {source}")]
    Unit {
        node: String,
        #[source]
        source: UnitError,
    },

    /// A direct `configure_unit` call was rejected by the unit.
    #[error("cannot configure node {node:?}: {source}")]
    Parameter {
        node: String,
        #[source]
        source: ParameterError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The worker runtime could not be started.
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// At least one worker failed; the report holds every node's outcome.
    #[error("run failed: {}", .0.summary())]
    RunFailed(Box<RunReport>),
}

/// Errors returned by processing-unit callbacks.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl UnitError {
    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Recoverable failures of `set_parameter`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("unknown parameter {0:?}")]
    UnknownKey(String),

    #[error("invalid value for parameter {key:?}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors in the engine configuration itself.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed engine configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("engine setting `{0}` must be at least 1")]
    Zero(&'static str),
}
