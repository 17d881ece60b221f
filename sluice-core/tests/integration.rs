//! Integration Tests for the Pipeline Engine
//!
//! These tests drive whole graphs through the public API: previews, streaming
//! runs, editing and layout.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_core::unit::{shared, BoxIter};
use sluice_core::units::{CollectSink, FoldUnit, IterSource, MapUnit};
use sluice_core::{
    EngineConfig, Graph, GraphError, Message, Node, NodeId, NodeOutcome, NodeState, Outputs,
    ProcessingUnit, Sources, UnitError,
};
use tokio_util::sync::CancellationToken;

fn source(graph: &mut Graph<i64>, name: &str, items: Vec<i64>) -> NodeId {
    graph
        .add_node(Node::with_unit(name, shared(IterSource::new(items))))
        .unwrap()
}

fn doubler(graph: &mut Graph<i64>, name: &str) -> NodeId {
    graph
        .add_node(Node::with_unit(name, shared(MapUnit::new(|x: i64| x * 2))))
        .unwrap()
}

/// Records every message it is handed, in order.
#[derive(Default)]
struct Tap {
    seen: Arc<Mutex<Vec<(String, Message<i64>)>>>,
}

impl ProcessingUnit<i64> for Tap {
    fn execute(
        &mut self,
        _name: &str,
        sources: Sources<i64>,
        _row_limit: Option<usize>,
    ) -> Result<BoxIter<i64>, UnitError> {
        let items: Vec<i64> = sources.into_values().flatten().collect();
        Ok(Box::new(items.into_iter()))
    }

    fn process(&mut self, item: i64, source: &str) -> Result<Outputs<i64>, UnitError> {
        self.seen.lock().push((source.to_string(), Message::Data(item)));
        Ok(Outputs::new())
    }

    fn finished(&mut self, source: &str) -> Result<Outputs<i64>, UnitError> {
        self.seen
            .lock()
            .push((source.to_string(), Message::SourceFinished));
        Ok(Outputs::new())
    }
}

/// Fails on a specific item.
struct Tripwire {
    on: i64,
}

impl ProcessingUnit<i64> for Tripwire {
    fn execute(
        &mut self,
        _name: &str,
        _sources: Sources<i64>,
        _row_limit: Option<usize>,
    ) -> Result<BoxIter<i64>, UnitError> {
        Err(UnitError::msg("batch mode unsupported"))
    }

    fn process(&mut self, item: i64, _source: &str) -> Result<Outputs<i64>, UnitError> {
        if item == self.on {
            return Err(UnitError::msg(format!("refusing {item}")));
        }
        Ok(smallvec::smallvec![item])
    }
}

/// Produces the same item forever.
struct Endless;

impl ProcessingUnit<i64> for Endless {
    fn execute(
        &mut self,
        _name: &str,
        _sources: Sources<i64>,
        row_limit: Option<usize>,
    ) -> Result<BoxIter<i64>, UnitError> {
        let items = std::iter::repeat(1);
        Ok(match row_limit {
            Some(limit) => Box::new(items.take(limit)),
            None => Box::new(items),
        })
    }

    fn process(&mut self, item: i64, _source: &str) -> Result<Outputs<i64>, UnitError> {
        Ok(smallvec::smallvec![item])
    }
}

/// Emits `1..=n` and declares no role of its own.
struct Countdown(i64);

impl ProcessingUnit<i64> for Countdown {
    fn execute(
        &mut self,
        _name: &str,
        _sources: Sources<i64>,
        _row_limit: Option<usize>,
    ) -> Result<BoxIter<i64>, UnitError> {
        Ok(Box::new(1..=self.0))
    }

    fn process(&mut self, item: i64, _source: &str) -> Result<Outputs<i64>, UnitError> {
        Ok(smallvec::smallvec![item])
    }
}

/// Test the A -> B -> C chain: double then sum.
#[test]
fn chain_run_doubles_and_sums() {
    let mut graph = Graph::with_config(EngineConfig::default().with_worker_threads(2));
    let a = source(&mut graph, "a", vec![1, 2, 3]);
    let b = doubler(&mut graph, "b");

    let sum = FoldUnit::new(0, |acc: i64, x: i64| acc + x);
    let total = sum.output();
    let c = graph.add_node(Node::with_unit("c", shared(sum))).unwrap();

    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, b).unwrap();

    let report = graph.run().unwrap();

    assert!(report.is_success());
    assert_eq!(*total.lock(), Some(12));
    assert_eq!(graph.node(a).unwrap().counter(), 3);
    // Three items from b plus its end-of-stream marker.
    assert_eq!(graph.node(c).unwrap().counter(), 4);
    assert_eq!(report.counters["c"], 4);
    assert_eq!(graph.node(c).unwrap().state(), NodeState::Completed);

    // A streaming run leaves the preview caches alone.
    assert!(graph.nodes().all(|node| node.is_dirty()));
}

/// Test that a consumer sees each item tagged with its parent, then one marker.
#[test]
fn consumer_receives_items_then_one_marker() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1, 2, 3]);
    let b = doubler(&mut graph, "b");

    let tap = Tap::default();
    let seen = Arc::clone(&tap.seen);
    let c = graph.add_node(Node::with_unit("c", shared(tap))).unwrap();

    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, b).unwrap();
    graph.run().unwrap();

    let expected: Vec<(String, Message<i64>)> = vec![
        ("b".into(), Message::Data(2)),
        ("b".into(), Message::Data(4)),
        ("b".into(), Message::Data(6)),
        ("b".into(), Message::SourceFinished),
    ];
    assert_eq!(*seen.lock(), expected);
}

/// Test fan-in: a sink hears every item and one marker per parent.
#[test]
fn fan_in_tracks_every_parent() {
    let mut graph = Graph::with_config(EngineConfig::default().with_mailbox_capacity(1));
    let left = source(&mut graph, "left", (0..50).collect());
    let right = source(&mut graph, "right", (100..150).collect());

    let sink = CollectSink::new();
    let collected = sink.handle();
    let sink = graph.add_node(Node::with_unit("sink", shared(sink))).unwrap();
    graph.add_parent(sink, left).unwrap();
    graph.add_parent(sink, right).unwrap();

    graph.run().unwrap();

    let collected = collected.lock();
    assert_eq!(collected.items.len(), 100);
    let mut finished = collected.finished.clone();
    finished.sort();
    assert_eq!(finished, vec!["left", "right"]);

    // Per-edge order is preserved even with interleaving.
    let from_left: Vec<i64> = collected.items.iter().copied().filter(|x| *x < 100).collect();
    assert_eq!(from_left, (0..50).collect::<Vec<_>>());
}

/// Test removing one branch of a fan-out.
#[test]
fn del_parent_on_fan_out() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1]);
    let b = doubler(&mut graph, "b");
    let c = doubler(&mut graph, "c");
    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, a).unwrap();
    graph.prerun().unwrap();
    assert!(!graph.node(c).unwrap().is_dirty());

    graph.del_parent(c, a).unwrap();

    assert!(!graph.node(c).unwrap().parents().contains(&a));
    assert!(!graph.node(a).unwrap().children().contains(&c));
    assert!(graph.node(c).unwrap().is_dirty());
    assert!(graph.node(b).unwrap().parents().contains(&a));
    assert!(graph.node(a).unwrap().children().contains(&b));
    assert!(!graph.node(b).unwrap().is_dirty());
}

/// Test the diamond layout.
#[test]
fn diamond_tidy() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1]);
    let b = doubler(&mut graph, "b");
    let c = doubler(&mut graph, "c");
    let d = doubler(&mut graph, "d");
    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, a).unwrap();
    graph.add_parent(d, b).unwrap();
    graph.add_parent(d, c).unwrap();

    graph.tidy().unwrap();

    let order = graph.traverse_forward().unwrap();
    let strata = graph.strata(&order);
    assert_eq!((strata[&a], strata[&b], strata[&c], strata[&d]), (0, 1, 1, 2));

    let pos = |id| graph.node(id).unwrap().position();
    assert_ne!(pos(b).x, pos(c).x);
    assert!(pos(a).y < pos(b).y && pos(b).y < pos(d).y);
}

/// Test that prerun cleans the whole ancestor closure and caps results.
#[test]
fn prerun_cleans_every_ancestor() {
    let mut graph = Graph::with_config(EngineConfig::default().with_prerun_row_limit(5));
    let a = source(&mut graph, "a", (0..20).collect());
    let b = doubler(&mut graph, "b");
    let c = doubler(&mut graph, "c");
    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, b).unwrap();

    graph.prerun_node(c).unwrap();

    for id in [a, b, c] {
        let node = graph.node(id).unwrap();
        assert!(!node.is_dirty(), "{} should be clean", node.name());
        assert!(!node.result().unwrap().as_slice().unwrap().is_empty());
    }
    assert_eq!(
        graph.node(c).unwrap().result().unwrap().as_slice().unwrap(),
        &[0, 4, 8, 12, 16]
    );
}

/// Test that an unlimited execute on a clean node reuses its cache.
#[test]
fn execute_is_idempotent() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1, 2]);
    let b = doubler(&mut graph, "b");
    let c = doubler(&mut graph, "c");
    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, a).unwrap();

    graph.execute_node(a, None).unwrap();
    let first = graph.node(a).unwrap().result().unwrap().share().unwrap();
    graph.execute_node(a, None).unwrap();
    let second = graph.node(a).unwrap().result().unwrap().share().unwrap();

    assert_eq!(
        first.as_slice().unwrap().as_ptr(),
        second.as_slice().unwrap().as_ptr()
    );
}

/// Test that a placeholder stops a run before anything starts.
#[test]
fn placeholder_blocks_a_run() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1]);
    let hole = graph.add_node(Node::new("hole")).unwrap();
    graph.add_parent(hole, a).unwrap();

    let err = graph.run().unwrap_err();
    assert!(matches!(err, GraphError::MissingUnit(name) if name == "hole"));
    assert_eq!(graph.node(a).unwrap().counter(), 0);
}

/// Test that a source unit wired below a parent is refused up front.
#[test]
fn incompatible_inputs_fail_fast() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1]);
    let b = source(&mut graph, "b", vec![2]);
    graph.add_parent(b, a).unwrap();

    let err = graph.run().unwrap_err();
    assert!(matches!(err, GraphError::IncompatibleInputs { node, .. } if node == "b"));
}

/// Test that a failing unit is reported instead of hanging the run.
#[test]
fn unit_failure_is_reported() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", (1..=10).collect());
    let trip = graph
        .add_node(Node::with_unit("trip", shared(Tripwire { on: 4 })))
        .unwrap();
    let sink = graph
        .add_node(Node::with_unit("sink", shared(CollectSink::<i64>::new())))
        .unwrap();
    graph.add_parent(trip, a).unwrap();
    graph.add_parent(sink, trip).unwrap();

    let err = graph.run().unwrap_err();
    let report = match err {
        GraphError::RunFailed(report) => report,
        other => panic!("expected RunFailed, got {other:?}"),
    };

    assert_eq!(
        report.failures().collect::<Vec<_>>(),
        vec![("trip", "refusing 4")]
    );
    assert_eq!(report.outcome("sink"), Some(&NodeOutcome::Cancelled));
    assert_eq!(graph.node(trip).unwrap().state(), NodeState::Failed);
    assert_eq!(
        graph.node(trip).unwrap().progress().failure().as_deref(),
        Some("refusing 4")
    );
}

/// Test that cancelling a run stops an endless source.
#[test]
fn cancellation_halts_a_run() {
    let mut graph = Graph::new();
    let endless = graph
        .add_node(Node::with_unit("endless", shared(Endless)))
        .unwrap();
    let sum = graph
        .add_node(Node::with_unit("sum", shared(FoldUnit::new(0, |acc: i64, x: i64| acc + x))))
        .unwrap();
    graph.add_parent(sum, endless).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let report = graph.run_with_cancel(cancel).unwrap();
    canceller.join().unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failures().count(), 0);
    assert_eq!(report.outcome("endless"), Some(&NodeOutcome::Cancelled));
    assert_eq!(report.outcome("sum"), Some(&NodeOutcome::Cancelled));
    assert!(graph.node(endless).unwrap().counter() > 0);
}

/// Test that a unit with no declared kind can feed a pipeline as its source.
#[test]
fn undeclared_unit_runs_as_a_source() {
    let mut graph = Graph::new();
    let numbers = graph
        .add_node(Node::with_unit("numbers", shared(Countdown(4))))
        .unwrap();
    let sum = FoldUnit::new(0, |acc: i64, x: i64| acc + x);
    let total = sum.output();
    let c = graph.add_node(Node::with_unit("sum", shared(sum))).unwrap();
    graph.add_parent(c, numbers).unwrap();

    let report = graph.run().unwrap();

    assert!(report.is_success());
    assert_eq!(*total.lock(), Some(10));
    assert_eq!(report.counters["numbers"], 4);
}

/// Test that dropping an unfinished run stops its workers.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_a_run_stops_its_workers() {
    let mut graph = Graph::new();
    let endless = graph
        .add_node(Node::with_unit("endless", shared(Endless)))
        .unwrap();
    let sum = graph
        .add_node(Node::with_unit("sum", shared(FoldUnit::new(0, |acc: i64, x: i64| acc + x))))
        .unwrap();
    graph.add_parent(sum, endless).unwrap();

    let cancel = CancellationToken::new();
    let run = graph.run_async(cancel.clone());
    let timed_out = tokio::time::timeout(Duration::from_millis(100), run).await;
    assert!(timed_out.is_err());
    assert!(!cancel.is_cancelled(), "the caller's token is left alone");

    // Let aborted tasks unwind, then check nothing is still producing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stopped_at = graph.node(endless).unwrap().counter();
    assert!(stopped_at > 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(graph.node(endless).unwrap().counter(), stopped_at);
}

/// Test that a cycle cannot be created.
#[test]
fn cycles_are_rejected() {
    let mut graph = Graph::new();
    let a = doubler(&mut graph, "a");
    let b = doubler(&mut graph, "b");
    let c = doubler(&mut graph, "c");
    graph.add_parent(b, a).unwrap();
    graph.add_parent(c, b).unwrap();

    assert!(matches!(graph.add_parent(a, c), Err(GraphError::Cycle { .. })));
    assert!(matches!(graph.add_parent(a, a), Err(GraphError::SelfLoop(_))));
    assert!(graph.node(a).unwrap().parents().is_empty());
}

/// Test running from inside an existing runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_async_on_the_callers_runtime() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![5, 6]);
    let sink = CollectSink::new();
    let collected = sink.handle();
    let b = graph.add_node(Node::with_unit("b", shared(sink))).unwrap();
    graph.add_parent(b, a).unwrap();

    let report = graph.run_async(CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(collected.lock().items, vec![5, 6]);
}

/// Test that graph edits and exports agree.
#[test]
fn snapshot_and_dot_export() {
    let mut graph = Graph::new();
    let a = source(&mut graph, "a", vec![1]);
    let b = doubler(&mut graph, "b");
    graph.add_parent(b, a).unwrap();

    let dot = graph.to_dot();
    assert!(dot.contains("\"a\" -> \"b\""));

    let snapshot = graph.snapshot();
    let json = snapshot.to_json().unwrap();
    assert!(json.contains("\"b\""));

    graph.del_node(b).unwrap();
    assert_ne!(graph.snapshot(), snapshot);
    assert!(graph.node(a).unwrap().children().is_empty());
}
