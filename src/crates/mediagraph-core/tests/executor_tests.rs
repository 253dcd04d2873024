//! Single-graph executor scenarios: event ordering, caching, staleness,
//! failure truncation, and cancellation.

mod common;

use std::sync::Arc;

use futures::{pin_mut, StreamExt};

use common::{add_node, connect, MockBackend, MemoryStore};
use mediagraph_core::execution::{ExecutionContext, ExecutionEvent, ExecutionEventType};
use mediagraph_core::executor::GraphExecutor;
use mediagraph_core::graph::Graph;
use mediagraph_core::handlers::NodeDispatcher;
use mediagraph_core::node::{NodeStatus, NodeType};
use mediagraph_core::resolver::InputResolver;
use mediagraph_core::traits::NoopEnricher;

fn executor_with(backend: Arc<MockBackend>) -> GraphExecutor {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(NodeDispatcher::new(
        backend,
        store.clone(),
        Arc::new(NoopEnricher),
    ));
    GraphExecutor::new(dispatcher, InputResolver::new(store))
}

/// A (text) -> B (image) -> C (video).
fn linear_graph() -> Graph {
    let mut graph = Graph::new("g1", "linear");
    add_node(&mut graph, "a", NodeType::GenerateText);
    add_node(&mut graph, "b", NodeType::GenerateImage);
    add_node(&mut graph, "c", NodeType::GenerateVideo);
    connect(&mut graph, "a", "b");
    connect(&mut graph, "b", "c");
    graph
}

async fn run(
    executor: &GraphExecutor,
    graph: &mut Graph,
    outputs: &[&str],
    force: bool,
) -> Vec<ExecutionEvent> {
    let mut context = ExecutionContext::new(
        "run-1",
        graph.id.clone(),
        outputs.iter().map(|s| s.to_string()).collect(),
        force,
    );
    let events = executor.execute(graph, &mut context, "");
    pin_mut!(events);
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        collected.push(event);
    }
    collected
}

fn kinds(events: &[ExecutionEvent]) -> Vec<(ExecutionEventType, Option<&str>)> {
    events
        .iter()
        .map(|e| (e.event_type, e.node_id.as_deref()))
        .collect()
}

#[tokio::test]
async fn linear_three_node_run_emits_ordered_events() {
    let executor = executor_with(Arc::new(MockBackend::new()));
    let mut graph = linear_graph();
    let events = run(&executor, &mut graph, &["c"], false).await;

    use ExecutionEventType::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, None),
            (NodeStarted, Some("a")),
            (NodeCompleted, Some("a")),
            (NodeStarted, Some("b")),
            (NodeCompleted, Some("b")),
            (NodeStarted, Some("c")),
            (NodeCompleted, Some("c")),
            (Completed, None),
        ]
    );
    assert_eq!(graph.get_node("c").unwrap().status, NodeStatus::Completed);
    assert!(graph.get_node("c").unwrap().result.is_some());
}

#[tokio::test]
async fn diamond_starts_siblings_before_either_completes() {
    let executor = executor_with(Arc::new(MockBackend::new()));
    let mut graph = Graph::new("g1", "diamond");
    add_node(&mut graph, "a", NodeType::GenerateText);
    add_node(&mut graph, "b", NodeType::GenerateImage);
    add_node(&mut graph, "c", NodeType::GenerateImage);
    add_node(&mut graph, "d", NodeType::GenerateVideo);
    connect(&mut graph, "a", "b");
    connect(&mut graph, "a", "c");
    connect(&mut graph, "b", "d");
    connect(&mut graph, "c", "d");

    let events = run(&executor, &mut graph, &["d"], false).await;
    let position = |event_type: ExecutionEventType, node: &str| {
        events
            .iter()
            .position(|e| e.event_type == event_type && e.node_id.as_deref() == Some(node))
            .unwrap_or_else(|| panic!("missing {event_type:?} for {node}"))
    };

    use ExecutionEventType::*;
    // A completes before the middle level starts.
    assert!(position(NodeCompleted, "a") < position(NodeStarted, "b"));
    assert!(position(NodeCompleted, "a") < position(NodeStarted, "c"));
    // Both middle starts precede either middle completion.
    assert!(position(NodeStarted, "b") < position(NodeCompleted, "b").min(position(NodeCompleted, "c")));
    assert!(position(NodeStarted, "c") < position(NodeCompleted, "b").min(position(NodeCompleted, "c")));
    // D only after both parents.
    assert!(position(NodeStarted, "d") > position(NodeCompleted, "b"));
    assert!(position(NodeStarted, "d") > position(NodeCompleted, "c"));
}

#[tokio::test]
async fn second_run_skips_cached_nodes() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor_with(backend.clone());
    let mut graph = linear_graph();

    run(&executor, &mut graph, &["c"], false).await;
    let calls_after_first = backend.call_count();
    let history_after_first: usize = graph.nodes().map(|n| n.generation_history.len()).sum();

    let events = run(&executor, &mut graph, &["c"], false).await;
    use ExecutionEventType::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, None),
            (NodeSkipped, Some("a")),
            (NodeSkipped, Some("b")),
            (NodeSkipped, Some("c")),
            (Completed, None),
        ]
    );
    // Caching idempotence: no backend call, no new results.
    assert_eq!(backend.call_count(), calls_after_first);
    let history_after_second: usize = graph.nodes().map(|n| n.generation_history.len()).sum();
    assert_eq!(history_after_second, history_after_first);
}

#[tokio::test]
async fn force_rerun_ignores_cache() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor_with(backend.clone());
    let mut graph = linear_graph();

    run(&executor, &mut graph, &["c"], false).await;
    let events = run(&executor, &mut graph, &["c"], true).await;

    use ExecutionEventType::*;
    let skipped = events.iter().filter(|e| e.event_type == NodeSkipped).count();
    assert_eq!(skipped, 0);
    assert_eq!(events.last().unwrap().event_type, Completed);
    assert_eq!(graph.get_node("a").unwrap().generation_history.len(), 2);
}

#[tokio::test]
async fn stale_upstream_forces_downstream_rerun() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor_with(backend.clone());
    let mut graph = linear_graph();
    run(&executor, &mut graph, &["c"], false).await;

    // A content-affecting change on the root taints the whole chain.
    graph.mark_stale("a");
    let events = run(&executor, &mut graph, &["c"], false).await;

    use ExecutionEventType::*;
    assert!(events.iter().all(|e| e.event_type != NodeSkipped));
    assert_eq!(graph.get_node("c").unwrap().generation_history.len(), 2);
}

#[tokio::test]
async fn failure_in_middle_truncates_run() {
    let backend = Arc::new(MockBackend::failing_on("b-prompt"));
    let executor = executor_with(backend.clone());
    let mut graph = linear_graph();
    let events = run(&executor, &mut graph, &["c"], false).await;

    use ExecutionEventType::*;
    assert_eq!(
        kinds(&events),
        vec![
            (Started, None),
            (NodeStarted, Some("a")),
            (NodeCompleted, Some("a")),
            (NodeStarted, Some("b")),
            (NodeFailed, Some("b")),
            (Failed, None),
        ]
    );
    // C never started; A's result survives.
    assert_eq!(graph.get_node("c").unwrap().status, NodeStatus::Idle);
    assert!(graph.get_node("a").unwrap().result.is_some());
    assert_eq!(graph.get_node("b").unwrap().status, NodeStatus::Failed);
    assert!(graph
        .get_node("b")
        .unwrap()
        .error_message
        .as_deref()
        .unwrap()
        .contains("scripted failure"));
}

#[tokio::test]
async fn sibling_failures_in_one_level_are_all_reported() {
    let backend = Arc::new(MockBackend::failing_on_all(&["b-prompt", "c-prompt"]));
    let executor = executor_with(backend);
    let mut graph = Graph::new("g1", "fanout");
    add_node(&mut graph, "a", NodeType::GenerateText);
    add_node(&mut graph, "b", NodeType::GenerateImage);
    add_node(&mut graph, "c", NodeType::GenerateImage);
    connect(&mut graph, "a", "b");
    connect(&mut graph, "a", "c");

    let events = run(&executor, &mut graph, &["b", "c"], false).await;
    use ExecutionEventType::*;
    let failures = events.iter().filter(|e| e.event_type == NodeFailed).count();
    assert_eq!(failures, 2);
    assert_eq!(events.last().unwrap().event_type, Failed);
}

#[tokio::test]
async fn cancellation_stops_before_first_level() {
    let executor = executor_with(Arc::new(MockBackend::new()));
    let mut graph = linear_graph();
    let mut context = ExecutionContext::new("run-1", "g1", vec!["c".to_string()], false);
    context.cancelled.cancel();

    let events = executor.execute(&mut graph, &mut context, "");
    pin_mut!(events);
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        collected.push(event);
    }

    use ExecutionEventType::*;
    assert_eq!(
        kinds(&collected),
        vec![(Started, None), (Cancelled, None)]
    );
}

#[tokio::test]
async fn outputs_restrict_execution_to_required_subgraph() {
    let backend = Arc::new(MockBackend::new());
    let executor = executor_with(backend.clone());
    let mut graph = linear_graph();

    // Only A -> B is needed for output B; C stays untouched.
    let events = run(&executor, &mut graph, &["b"], false).await;
    use ExecutionEventType::*;
    assert!(events
        .iter()
        .all(|e| e.node_id.as_deref() != Some("c")));
    assert_eq!(graph.get_node("c").unwrap().status, NodeStatus::Idle);
    assert_eq!(backend.call_count(), 2);
}
