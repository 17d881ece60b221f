//! Node Workers
//!
//! One worker drives one node's unit for the length of a streaming run.
//!
//! # Protocol
//!
//! - A source node calls its unit's batch `execute` and broadcasts every
//!   produced item to all children.
//! - Any other node waits on its mailbox until every parent has sent its
//!   end-of-stream marker, feeding items to `process` and markers to
//!   `finished`, then calls `finalize` once.
//! - Either way, the worker ends by broadcasting its own end-of-stream
//!   marker so each child can track this node among its parents.
//!
//! Everything a callback emits is broadcast to the children in child order,
//! one awaited send at a time: a full child mailbox holds this worker (and
//! therefore its siblings' next items) until it drains.
//!
//! The unit lock is only ever held for the duration of a single callback,
//! never across an `.await`.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::mailbox::{Envelope, Mailbox, MailboxSender, Message};
use super::TRACING_TARGET;
use crate::error::UnitError;
use crate::graph::NodeProgress;
use crate::unit::{Outputs, SharedUnit};

/// Why a worker stopped early.
#[derive(Debug, Error)]
pub(crate) enum WorkerError {
    #[error("cancelled")]
    Cancelled,

    /// A child's mailbox is gone; the run is being torn down.
    #[error("downstream mailbox closed")]
    DownstreamClosed,

    #[error("mailbox closed while still awaiting {0:?}")]
    UpstreamClosed(Vec<String>),

    #[error(transparent)]
    Unit(#[from] UnitError),
}

impl WorkerError {
    /// Errors caused by this node itself, as opposed to the run stopping
    /// around it.
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, Self::UpstreamClosed(_) | Self::Unit(_))
    }
}

pub(crate) struct Worker<T> {
    pub(crate) name: Arc<str>,
    pub(crate) unit: SharedUnit<T>,
    /// Names of the parents this node awaits. Empty for sources.
    pub(crate) parents: Vec<String>,
    /// `None` for sources, which have nothing to read.
    pub(crate) mailbox: Option<Mailbox<T>>,
    pub(crate) children: Vec<MailboxSender<T>>,
    pub(crate) progress: Arc<NodeProgress>,
    pub(crate) cancel: CancellationToken,
}

impl<T> Worker<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Drive the unit to completion.
    ///
    /// Unless the worker finishes cleanly, the run is cancelled before its
    /// senders are dropped. Children then see the cancellation rather than a
    /// closed mailbox, even when the unit panics.
    pub(crate) async fn run(mut self) -> Result<(), WorkerError> {
        tracing::debug!(target: TRACING_TARGET, node = %self.name, "Worker started");
        let guard = self.cancel.clone().drop_guard();

        match self.mailbox.take() {
            Some(mailbox) if !self.parents.is_empty() => self.consume(mailbox).await?,
            _ => self.produce().await?,
        }

        self.broadcast(Message::SourceFinished).await?;
        guard.disarm();
        tracing::debug!(
            target: TRACING_TARGET,
            node = %self.name,
            counter = self.progress.counter(),
            "Worker finished"
        );
        Ok(())
    }

    /// Source branch: stream the unit's batch output.
    async fn produce(&self) -> Result<(), WorkerError> {
        let items = self.unit.lock().execute(&self.name, IndexMap::new(), None)?;

        for item in items {
            if self.cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            self.progress.bump();
            self.broadcast(Message::Data(item)).await?;
        }
        Ok(())
    }

    /// Consumer branch: react to every envelope until all parents finished.
    async fn consume(&self, mut mailbox: Mailbox<T>) -> Result<(), WorkerError> {
        let mut awaited: IndexSet<String> = self.parents.iter().cloned().collect();
        self.unit.lock().prepare(&self.parents, None)?;

        while !awaited.is_empty() {
            let envelope = tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Err(WorkerError::Cancelled),
                envelope = mailbox.recv() => envelope,
            };
            let Some(Envelope { source, message }) = envelope else {
                return Err(WorkerError::UpstreamClosed(awaited.into_iter().collect()));
            };
            self.progress.bump();

            let outputs = match message {
                Message::Data(item) => self.unit.lock().process(item, &source)?,
                Message::SourceFinished => {
                    if !awaited.shift_remove(&*source) {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            node = %self.name,
                            source = %source,
                            "Ignoring end-of-stream from a source that is not awaited"
                        );
                        continue;
                    }
                    self.unit.lock().finished(&source)?
                }
            };
            self.emit(outputs).await?;
        }

        let outputs = self.unit.lock().finalize()?;
        self.emit(outputs).await
    }

    async fn emit(&self, outputs: Outputs<T>) -> Result<(), WorkerError> {
        for item in outputs {
            self.broadcast(Message::Data(item)).await?;
        }
        Ok(())
    }

    /// Send a copy of `message` to every child, in child order.
    async fn broadcast(&self, message: Message<T>) -> Result<(), WorkerError> {
        let Some((last, rest)) = self.children.split_last() else {
            return Ok(());
        };
        for child in rest {
            self.send(child, message.clone()).await?;
        }
        self.send(last, message).await
    }

    async fn send(&self, child: &MailboxSender<T>, message: Message<T>) -> Result<(), WorkerError> {
        let envelope = Envelope {
            source: Arc::clone(&self.name),
            message,
        };
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Err(WorkerError::Cancelled),
            sent = child.send(envelope) => sent.map_err(|_| WorkerError::DownstreamClosed),
        }
    }
}
