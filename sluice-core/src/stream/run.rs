//! Run Orchestration
//!
//! `Graph::run` executes the whole pipeline in streaming mode.
//!
//! # How It Works
//!
//! 1. The graph is checked before anything starts: it must be acyclic,
//!    every node needs a unit, and every unit must accept the number of
//!    inputs wired to it. Pending configuration is applied.
//!
//! 2. Every node gets a mailbox and a worker task. Tasks run on a bounded
//!    pool of threads and suspend while their mailbox is empty or a child's
//!    mailbox is full, so the pool never has to match the node count.
//!
//! 3. The orchestrator waits for each task's completion and reports
//!    progress (items processed, mailbox depth) on a fixed interval.
//!
//! # Failure and Cancellation
//!
//! A failing unit (error or panic) marks its node failed and cancels the
//! run, so every other worker stops instead of waiting forever for data
//! that will never come. Callers can cancel a run the same way through a
//! [`CancellationToken`]. Either way `run` returns once every worker has
//! stopped, with a [`RunReport`] describing each node.

use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::mailbox::{mailbox, Mailbox, MailboxSender};
use super::worker::{Worker, WorkerError};
use super::TRACING_TARGET;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId, NodeState};

/// How one node's worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    Failed(String),
    /// Stopped because the run was cancelled or torn down around it.
    Cancelled,
}

/// The result of a streaming run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Outcome per node name, in graph insertion order.
    pub outcomes: IndexMap<String, NodeOutcome>,
    /// Items each node processed or emitted.
    pub counters: IndexMap<String, u64>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Every node completed.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(|o| *o == NodeOutcome::Completed)
    }

    /// `(node, reason)` for every failed node.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            NodeOutcome::Failed(reason) => Some((name.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node)
    }

    /// One-line description, e.g. for error messages.
    pub fn summary(&self) -> String {
        let failures: Vec<String> = self
            .failures()
            .map(|(node, reason)| format!("{node}: {reason}"))
            .collect();
        if failures.is_empty() {
            let cancelled = self
                .outcomes
                .values()
                .filter(|o| **o == NodeOutcome::Cancelled)
                .count();
            format!(
                "{} node(s) completed, {cancelled} cancelled",
                self.outcomes.len() - cancelled
            )
        } else {
            failures.join("; ")
        }
    }
}

impl<T> Graph<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run the whole graph in streaming mode and wait for it to finish.
    ///
    /// Starts its own worker pool; from inside an async context use
    /// [`Graph::run_async`] instead.
    pub fn run(&mut self) -> Result<RunReport> {
        self.run_with_cancel(CancellationToken::new())
    }

    /// Like [`Graph::run`], stopping early once `cancel` fires.
    pub fn run_with_cancel(&mut self, cancel: CancellationToken) -> Result<RunReport> {
        self.config().validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config().worker_threads)
            .thread_name("sluice-worker")
            .enable_all()
            .build()?;
        runtime.block_on(self.run_async(cancel))
    }

    /// Run the whole graph on the current tokio runtime.
    ///
    /// Returns `Err(GraphError::RunFailed)` if any node failed. A run that
    /// was only cancelled returns its report normally.
    pub async fn run_async(&mut self, cancel: CancellationToken) -> Result<RunReport> {
        let order = self.prepare_run()?;
        let started = Instant::now();
        let token = cancel.child_token();

        // Dropping this future aborts the workers through the JoinSet and
        // cancels the run.
        let _guard = token.clone().drop_guard();
        let (mut tasks, nodes) = self.spawn_workers(&token);
        tracing::info!(target: TRACING_TARGET, nodes = tasks.len(), "Run started");

        let mut ticker = tokio::time::interval(self.config().progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut outcomes: HashMap<NodeId, NodeOutcome> = HashMap::with_capacity(self.len());
        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (task, outcome) = match joined {
                        Ok((task, Ok(()))) => (task, NodeOutcome::Completed),
                        Ok((task, Err(err))) => (task, NodeOutcome::from(err)),
                        Err(err) => (err.id(), NodeOutcome::from(err)),
                    };
                    let Some(&id) = nodes.get(&task) else {
                        continue;
                    };
                    if matches!(outcome, NodeOutcome::Failed(_)) {
                        token.cancel();
                    }
                    self.record_outcome(id, &outcome);
                    outcomes.insert(id, outcome);
                }
                _ = ticker.tick() => self.report_progress(&order),
            }
        }
        self.report_progress(&order);

        let report = RunReport {
            outcomes: self
                .nodes
                .iter()
                .map(|(id, node)| {
                    let outcome = outcomes.remove(id).unwrap_or(NodeOutcome::Cancelled);
                    (node.name().to_string(), outcome)
                })
                .collect(),
            counters: self
                .nodes
                .values()
                .map(|node| (node.name().to_string(), node.counter()))
                .collect(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            target: TRACING_TARGET,
            elapsed_ms = report.elapsed.as_millis() as u64,
            summary = %report.summary(),
            "Run ended"
        );

        if report.failures().next().is_some() {
            return Err(GraphError::RunFailed(Box::new(report)));
        }
        Ok(report)
    }

    /// Check the graph can run and apply pending configuration.
    ///
    /// Returns the forward traversal order.
    fn prepare_run(&mut self) -> Result<Vec<NodeId>> {
        self.config().validate()?;
        let order = self.traverse_forward()?;

        for id in &order {
            let node = self.require(*id)?;
            let unit = node
                .unit()
                .ok_or_else(|| GraphError::MissingUnit(node.name().to_string()))?;
            unit.lock()
                .validate_inputs(node.parents().len())
                .map_err(|source| GraphError::IncompatibleInputs {
                    node: node.name().to_string(),
                    source,
                })?;
        }

        for id in &order {
            self.load_config(*id)?;
        }

        Ok(order)
    }

    /// Create every mailbox and start one worker per node.
    ///
    /// Returns the running workers together with the node each task drives.
    fn spawn_workers(
        &self,
        token: &CancellationToken,
    ) -> (JoinSet<Result<(), WorkerError>>, HashMap<task::Id, NodeId>) {
        let capacity = self.config().mailbox_capacity;
        let mut senders: HashMap<NodeId, MailboxSender<T>> = HashMap::new();
        let mut mailboxes: HashMap<NodeId, Mailbox<T>> = HashMap::new();

        for (id, node) in &self.nodes {
            node.progress().reset();
            if !node.is_source() {
                let (tx, rx) = mailbox(capacity, node.progress().clone());
                senders.insert(*id, tx);
                mailboxes.insert(*id, rx);
            }
        }

        let mut tasks = JoinSet::new();
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            // Checked by prepare_run.
            let Some(unit) = node.unit().cloned() else {
                continue;
            };
            let worker = Worker {
                name: node.name().into(),
                unit,
                parents: node
                    .parents()
                    .iter()
                    .filter_map(|p| self.nodes.get(p))
                    .map(|p| p.name().to_string())
                    .collect(),
                mailbox: mailboxes.remove(id),
                children: node
                    .children()
                    .iter()
                    .filter_map(|c| senders.get(c).cloned())
                    .collect(),
                progress: node.progress().clone(),
                cancel: token.clone(),
            };

            node.progress().set_state(NodeState::Running);
            let handle = tasks.spawn(worker.run());
            nodes.insert(handle.id(), *id);
        }

        // Workers hold the only senders now, so a mailbox closes when all of
        // its parents are done.
        drop(senders);
        (tasks, nodes)
    }

    fn record_outcome(&self, id: NodeId, outcome: &NodeOutcome) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match outcome {
            NodeOutcome::Completed => node.progress().set_state(NodeState::Completed),
            NodeOutcome::Cancelled => node.progress().set_state(NodeState::Cancelled),
            NodeOutcome::Failed(reason) => {
                tracing::error!(target: TRACING_TARGET, node = %node.name(), %reason, "Node failed");
                node.progress().fail(reason.clone());
            }
        }
    }

    fn report_progress(&self, order: &[NodeId]) {
        for node in order.iter().filter_map(|id| self.nodes.get(id)) {
            tracing::info!(
                target: TRACING_TARGET,
                node = %node.name(),
                counter = node.counter(),
                depth = node.mailbox_depth(),
                state = ?node.state(),
                "Progress"
            );
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl From<JoinError> for NodeOutcome {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            Self::Failed(format!("worker panicked: {}", panic_message(err.into_panic())))
        } else {
            Self::Cancelled
        }
    }
}

impl From<WorkerError> for NodeOutcome {
    fn from(err: WorkerError) -> Self {
        if err.is_failure() {
            Self::Failed(err.to_string())
        } else {
            Self::Cancelled
        }
    }
}
