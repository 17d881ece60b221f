//! Mailboxes
//!
//! Every node reads its input from one bounded FIFO mailbox. Parents push
//! [`Envelope`]s into it; when the mailbox is full a parent's send suspends
//! until the node catches up, which is how back-pressure travels upstream.
//!
//! End-of-stream is an explicit [`Message::SourceFinished`] variant rather
//! than a reserved data value, so no item can ever be mistaken for it.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::graph::NodeProgress;

/// What travels along an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<T> {
    Data(T),
    /// The tagged source will send nothing more.
    SourceFinished,
}

/// A message tagged with the name of the node that sent it.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub source: Arc<str>,
    pub message: Message<T>,
}

/// The mailbox was closed by its owner.
#[derive(Debug)]
pub(crate) struct Closed;

/// Sending half of a node's mailbox. Cloned once per parent.
pub(crate) struct MailboxSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
    progress: Arc<NodeProgress>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Deliver an envelope, waiting while the mailbox is full.
    pub(crate) async fn send(&self, envelope: Envelope<T>) -> Result<(), Closed> {
        self.tx.send(envelope).await.map_err(|_| Closed)?;
        self.progress
            .set_mailbox_depth(self.tx.max_capacity() - self.tx.capacity());
        Ok(())
    }
}

/// Receiving half of a node's mailbox, owned by the node's worker.
pub(crate) struct Mailbox<T> {
    rx: mpsc::Receiver<Envelope<T>>,
    progress: Arc<NodeProgress>,
}

impl<T> Mailbox<T> {
    /// Wait for the next envelope. `None` once every sender is gone and the
    /// mailbox is drained.
    pub(crate) async fn recv(&mut self) -> Option<Envelope<T>> {
        let envelope = self.rx.recv().await;
        self.progress.set_mailbox_depth(self.rx.len());
        envelope
    }
}

/// Create a mailbox holding at most `capacity` undelivered envelopes.
pub(crate) fn mailbox<T>(
    capacity: usize,
    progress: Arc<NodeProgress>,
) -> (MailboxSender<T>, Mailbox<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        MailboxSender {
            tx,
            progress: Arc::clone(&progress),
        },
        Mailbox { rx, progress },
    )
}
