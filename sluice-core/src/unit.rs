//! Processing-Unit Contract
//!
//! A processing unit is the transform living inside a graph node. The engine
//! never looks at the data; it only drives units through two execution modes.
//!
//! # Batch mode
//!
//! [`ProcessingUnit::execute`] receives the results of every parent, keyed by
//! parent name, and returns a lazy sequence of output items. Previews call it
//! with a row limit that the unit must honour.
//!
//! # Streaming mode
//!
//! A full run drives the unit item by item:
//!
//! 1. `prepare` once, with the names of every upstream source.
//! 2. `process` for every incoming item, in any interleaving across sources.
//! 3. `finished` exactly once per source, after that source's last item.
//! 4. `finalize` exactly once, after every source has finished.
//!
//! Every callback may emit zero or more items, which the engine broadcasts to
//! the node's children.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ParameterError, UnitError};

/// A lazy, single-use sequence of items.
pub type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;

/// Items emitted by a single streaming callback. Usually zero or one.
pub type Outputs<T> = SmallVec<[T; 2]>;

/// Parent results handed to a batch `execute`, keyed by parent name.
pub type Sources<T> = IndexMap<String, Batch<T>>;

/// Value of a configuration parameter.
pub type ParameterValue = serde_json::Value;

/// A unit shared between a node and the worker that drives it.
pub type SharedUnit<T> = Arc<Mutex<Box<dyn ProcessingUnit<T>>>>;

/// Wrap a unit so it can be attached to a node.
pub fn shared<T, U>(unit: U) -> SharedUnit<T>
where
    U: ProcessingUnit<T> + 'static,
{
    Arc::new(Mutex::new(Box::new(unit)))
}

/// The role a unit plays in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Produces data from nothing; takes no inputs.
    Source,
    /// Consumes and produces data.
    Transform,
    /// Consumes data; emits nothing downstream.
    Sink,
}

/// One pending configuration assignment: `key_path = value`, with paths in
/// the value resolved against `base_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key_path: String,
    pub value: ParameterValue,
    pub base_dir: PathBuf,
}

impl ConfigEntry {
    pub fn new(
        key_path: impl Into<String>,
        value: impl Into<ParameterValue>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key_path: key_path.into(),
            value: value.into(),
            base_dir: base_dir.into(),
        }
    }
}

/// The capability interface every node's transform exposes.
pub trait ProcessingUnit<T>: Send {
    /// Batch mode: compute the whole output from the parents' results.
    ///
    /// When `row_limit` is set, the returned sequence must not yield more
    /// than that many items.
    fn execute(
        &mut self,
        name: &str,
        sources: Sources<T>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<T>, UnitError>;

    /// Called once before streaming starts.
    fn prepare(&mut self, sources: &[String], row_limit: Option<usize>) -> Result<(), UnitError> {
        let _ = (sources, row_limit);
        Ok(())
    }

    /// Handle one item from `source`.
    fn process(&mut self, item: T, source: &str) -> Result<Outputs<T>, UnitError>;

    /// `source` will send nothing more.
    fn finished(&mut self, source: &str) -> Result<Outputs<T>, UnitError> {
        let _ = source;
        Ok(Outputs::new())
    }

    /// Every source has finished.
    fn finalize(&mut self) -> Result<Outputs<T>, UnitError> {
        Ok(Outputs::new())
    }

    /// Set the parameter addressed by a dotted `key_path`.
    fn set_parameter(
        &mut self,
        key_path: &str,
        value: &ParameterValue,
        base_dir: &Path,
    ) -> Result<(), ParameterError> {
        let _ = (value, base_dir);
        Err(ParameterError::UnknownKey(key_path.to_string()))
    }

    /// The role this unit insists on, if any.
    ///
    /// Undeclared units take whatever position they are wired into: without
    /// parents they act as a source.
    fn kind(&self) -> Option<UnitKind> {
        None
    }

    /// Reject wirings the unit cannot work with. Checked before a run starts.
    fn validate_inputs(&self, parent_count: usize) -> Result<(), UnitError> {
        match (self.kind(), parent_count) {
            (None, _) => Ok(()),
            (Some(UnitKind::Source), 0) => Ok(()),
            (Some(UnitKind::Source), n) => Err(UnitError::msg(format!(
                "a source takes no inputs, but {n} are connected"
            ))),
            (Some(_), 0) => Err(UnitError::msg("at least one input must be connected")),
            (Some(_), _) => Ok(()),
        }
    }
}

/// A node's cached output.
///
/// Lazy batches can be read once. Frozen batches are immutable and can be
/// shared by any number of consumers.
pub enum Batch<T> {
    Lazy(BoxIter<T>),
    Frozen(Arc<[T]>),
}

impl<T> Batch<T> {
    /// A frozen batch holding `items`.
    pub fn frozen(items: impl Into<Arc<[T]>>) -> Self {
        Self::Frozen(items.into())
    }

    /// An empty frozen batch.
    pub fn empty() -> Self {
        Self::Frozen(Arc::from(Vec::new()))
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Frozen(_))
    }

    /// The items of a frozen batch.
    pub fn as_slice(&self) -> Option<&[T]> {
        match self {
            Self::Frozen(items) => Some(items),
            Self::Lazy(_) => None,
        }
    }

    /// Another handle onto a frozen batch. Lazy batches cannot be shared.
    pub fn share(&self) -> Option<Self> {
        match self {
            Self::Frozen(items) => Some(Self::Frozen(Arc::clone(items))),
            Self::Lazy(_) => None,
        }
    }

    /// Materialise the batch, draining a lazy sequence.
    pub fn freeze(self) -> Self {
        match self {
            Self::Lazy(items) => Self::Frozen(items.collect::<Vec<_>>().into()),
            frozen => frozen,
        }
    }
}

impl<T> std::fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lazy(_) => f.write_str("Batch::Lazy(..)"),
            Self::Frozen(items) => write!(f, "Batch::Frozen({} items)", items.len()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = BatchIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Lazy(items) => BatchIter::Lazy(items),
            Self::Frozen(items) => BatchIter::Frozen { items, next: 0 },
        }
    }
}

/// Iterator over a [`Batch`]. Frozen items are cloned out of the shared slice.
pub enum BatchIter<T> {
    Lazy(BoxIter<T>),
    Frozen { items: Arc<[T]>, next: usize },
}

impl<T: Clone> Iterator for BatchIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self {
            Self::Lazy(items) => items.next(),
            Self::Frozen { items, next } => {
                let item = items.get(*next).cloned();
                *next += 1;
                item
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Lazy(items) => items.size_hint(),
            Self::Frozen { items, next } => {
                let left = items.len().saturating_sub(*next);
                (left, Some(left))
            }
        }
    }
}
