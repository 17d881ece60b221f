//! Reusable Units
//!
//! Small, generic implementations of the processing-unit contract, one per
//! [`UnitKind`]. They carry no domain logic of their own; the closures and
//! data they are built from do.
//!
//! - [`IterSource`]: emits a fixed list of items.
//! - [`MapUnit`]: transforms every item with a function.
//! - [`FoldUnit`]: folds everything it receives into one item.
//! - [`CollectSink`]: records everything it receives.
//!
//! Units that need to be observed after a run hand out a shared handle
//! before they are moved into a node.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use smallvec::smallvec;

use crate::error::{ParameterError, UnitError};
use crate::unit::{BoxIter, Outputs, ParameterValue, ProcessingUnit, Sources, UnitKind};

fn decode<V: DeserializeOwned>(key: &str, value: &ParameterValue) -> Result<V, ParameterError> {
    serde_json::from_value(value.clone()).map_err(|err| ParameterError::InvalidValue {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn limited<T: 'static>(
    items: impl Iterator<Item = T> + Send + 'static,
    row_limit: Option<usize>,
) -> BoxIter<T> {
    match row_limit {
        Some(limit) => Box::new(items.take(limit)),
        None => Box::new(items),
    }
}

/// Emits a fixed list of items.
///
/// Parameter `items` replaces the list.
#[derive(Debug, Clone)]
pub struct IterSource<T> {
    items: Vec<T>,
}

impl<T> IterSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T> ProcessingUnit<T> for IterSource<T>
where
    T: Clone + Send + Sync + DeserializeOwned + 'static,
{
    fn execute(
        &mut self,
        _name: &str,
        _sources: Sources<T>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<T>, UnitError> {
        Ok(limited(self.items.clone().into_iter(), row_limit))
    }

    fn process(&mut self, _item: T, source: &str) -> Result<Outputs<T>, UnitError> {
        Err(UnitError::msg(format!("source received input from {source:?}")))
    }

    fn set_parameter(
        &mut self,
        key_path: &str,
        value: &ParameterValue,
        _base_dir: &Path,
    ) -> Result<(), ParameterError> {
        match key_path {
            "items" => {
                self.items = decode(key_path, value)?;
                Ok(())
            }
            other => Err(ParameterError::UnknownKey(other.to_string())),
        }
    }

    fn kind(&self) -> Option<UnitKind> {
        Some(UnitKind::Source)
    }
}

/// Applies a function to every item.
///
/// In batch mode the inputs are concatenated in parent order and mapped
/// lazily.
pub struct MapUnit<T> {
    map: Arc<dyn Fn(T) -> T + Send + Sync>,
}

impl<T> MapUnit<T> {
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self { map: Arc::new(map) }
    }
}

impl<T> ProcessingUnit<T> for MapUnit<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn execute(
        &mut self,
        _name: &str,
        sources: Sources<T>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<T>, UnitError> {
        let map = Arc::clone(&self.map);
        let items = sources.into_values().flatten().map(move |item| map(item));
        Ok(limited(items, row_limit))
    }

    fn process(&mut self, item: T, _source: &str) -> Result<Outputs<T>, UnitError> {
        Ok(smallvec![(self.map)(item)])
    }

    fn kind(&self) -> Option<UnitKind> {
        Some(UnitKind::Transform)
    }
}

/// Folds every received item into an accumulator and emits the total once.
///
/// Parameter `initial` replaces the seed the fold starts from. The last
/// emitted total stays readable through [`FoldUnit::output`].
pub struct FoldUnit<T> {
    seed: T,
    fold: Arc<dyn Fn(T, T) -> T + Send + Sync>,
    acc: Option<T>,
    output: Arc<Mutex<Option<T>>>,
}

impl<T: Clone> FoldUnit<T> {
    pub fn new<F>(seed: T, fold: F) -> Self
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        Self {
            seed,
            fold: Arc::new(fold),
            acc: None,
            output: Arc::new(Mutex::new(None)),
        }
    }

    /// Handle onto the most recently emitted total.
    pub fn output(&self) -> Arc<Mutex<Option<T>>> {
        Arc::clone(&self.output)
    }

    fn publish(&self, total: &T) {
        *self.output.lock() = Some(total.clone());
    }
}

impl<T> ProcessingUnit<T> for FoldUnit<T>
where
    T: Clone + Send + Sync + DeserializeOwned + 'static,
{
    fn execute(
        &mut self,
        _name: &str,
        sources: Sources<T>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<T>, UnitError> {
        let fold = Arc::clone(&self.fold);
        let total = sources
            .into_values()
            .flatten()
            .fold(self.seed.clone(), |acc, item| fold(acc, item));
        self.publish(&total);
        Ok(limited(std::iter::once(total), row_limit))
    }

    fn prepare(&mut self, _sources: &[String], _row_limit: Option<usize>) -> Result<(), UnitError> {
        self.acc = Some(self.seed.clone());
        Ok(())
    }

    fn process(&mut self, item: T, _source: &str) -> Result<Outputs<T>, UnitError> {
        let acc = self.acc.take().unwrap_or_else(|| self.seed.clone());
        self.acc = Some((self.fold)(acc, item));
        Ok(Outputs::new())
    }

    fn finalize(&mut self) -> Result<Outputs<T>, UnitError> {
        let total = self.acc.take().unwrap_or_else(|| self.seed.clone());
        self.publish(&total);
        Ok(smallvec![total])
    }

    fn set_parameter(
        &mut self,
        key_path: &str,
        value: &ParameterValue,
        _base_dir: &Path,
    ) -> Result<(), ParameterError> {
        match key_path {
            "initial" => {
                self.seed = decode(key_path, value)?;
                Ok(())
            }
            other => Err(ParameterError::UnknownKey(other.to_string())),
        }
    }

    fn kind(&self) -> Option<UnitKind> {
        Some(UnitKind::Transform)
    }
}

/// What a [`CollectSink`] has seen.
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    /// Sources in the order their end-of-stream arrived.
    pub finished: Vec<String>,
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            finished: Vec::new(),
        }
    }
}

/// Records every item it receives and emits nothing.
pub struct CollectSink<T> {
    seen: Arc<Mutex<Collected<T>>>,
}

impl<T> CollectSink<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Collected::default())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Collected<T>>> {
        Arc::clone(&self.seen)
    }
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProcessingUnit<T> for CollectSink<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn execute(
        &mut self,
        _name: &str,
        sources: Sources<T>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<T>, UnitError> {
        let mut seen = self.seen.lock();
        seen.items.clear();
        seen.finished.clear();
        for (source, batch) in sources {
            seen.items.extend(batch);
            seen.finished.push(source);
        }
        if let Some(limit) = row_limit {
            seen.items.truncate(limit);
        }
        Ok(Box::new(std::iter::empty()))
    }

    fn prepare(&mut self, _sources: &[String], _row_limit: Option<usize>) -> Result<(), UnitError> {
        *self.seen.lock() = Collected::default();
        Ok(())
    }

    fn process(&mut self, item: T, _source: &str) -> Result<Outputs<T>, UnitError> {
        self.seen.lock().items.push(item);
        Ok(Outputs::new())
    }

    fn finished(&mut self, source: &str) -> Result<Outputs<T>, UnitError> {
        self.seen.lock().finished.push(source.to_string());
        Ok(Outputs::new())
    }

    fn kind(&self) -> Option<UnitKind> {
        Some(UnitKind::Sink)
    }
}
