//! Streaming Execution
//!
//! A streaming run pushes every item through the whole graph once, node by
//! node, instead of materializing each node's output like a preview does.
//!
//! # Overview
//!
//! - Each node runs in its own worker task and owns one bounded mailbox.
//! - Sources produce items; everything else reacts to items arriving from
//!   its parents.
//! - Every node tells its children when it is done with an end-of-stream
//!   marker. A node finishes once all of its parents have.
//!
//! Small mailboxes keep memory flat: a fast producer simply waits for its
//! slowest consumer.

mod mailbox;
mod run;
mod worker;

pub use mailbox::{Envelope, Message};
pub use run::{NodeOutcome, RunReport};

/// Tracing target for streaming runs.
pub(crate) const TRACING_TARGET: &str = "sluice_core::stream";
