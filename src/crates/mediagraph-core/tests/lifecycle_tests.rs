//! Run lifecycle: registry bookkeeping, streaming, cancellation, and
//! persistence touchpoints.

mod common;

use std::sync::Arc;

use futures::{pin_mut, StreamExt};

use common::{add_node, connect, MemoryRepo, MemoryStore, MockBackend};
use mediagraph_core::batch::BatchEventType;
use mediagraph_core::error::EngineError;
use mediagraph_core::execution::ExecutionEventType;
use mediagraph_core::executor::GraphExecutor;
use mediagraph_core::graph::Graph;
use mediagraph_core::handlers::NodeDispatcher;
use mediagraph_core::node::NodeType;
use mediagraph_core::resolver::InputResolver;
use mediagraph_core::runs::{BatchManager, ExecutionManager};
use mediagraph_core::scheduler::BatchScheduler;
use mediagraph_core::traits::{GraphRepository, NoopEnricher, StaticCanvasMemory};

struct Harness {
    repo: Arc<MemoryRepo>,
    executions: ExecutionManager,
    batches: BatchManager,
}

fn harness(backend: Arc<MockBackend>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(MemoryRepo::new());
    let dispatcher = Arc::new(NodeDispatcher::new(
        backend,
        store.clone(),
        Arc::new(NoopEnricher),
    ));
    let resolver = InputResolver::new(store);
    let executions = ExecutionManager::new(
        Arc::new(GraphExecutor::new(dispatcher.clone(), resolver.clone())),
        repo.clone(),
        Arc::new(StaticCanvasMemory),
    );
    let batches = BatchManager::new(
        Arc::new(BatchScheduler::new(dispatcher, resolver)),
        repo.clone(),
        Arc::new(StaticCanvasMemory),
    );
    Harness {
        repo,
        executions,
        batches,
    }
}

fn sample_graph(graph_id: &str) -> Graph {
    let mut graph = Graph::new(graph_id, graph_id);
    add_node(&mut graph, &format!("{graph_id}-a"), NodeType::GenerateText);
    add_node(&mut graph, &format!("{graph_id}-b"), NodeType::GenerateImage);
    connect(&mut graph, &format!("{graph_id}-a"), &format!("{graph_id}-b"));
    graph
}

#[tokio::test]
async fn start_unknown_graph_fails() {
    let h = harness(Arc::new(MockBackend::new()));
    let err = h
        .executions
        .start_execution("ghost", vec![], false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GraphNotFound(_)));
}

#[tokio::test]
async fn run_streams_to_terminal_and_leaves_registry() {
    let h = harness(Arc::new(MockBackend::new()));
    h.repo.save(&sample_graph("g1")).await.unwrap();
    let saves_before = h.repo.save_count();

    let run_id = h
        .executions
        .start_execution("g1", vec!["g1-b".to_string()], false)
        .await
        .unwrap();

    let events = h.executions.stream_execution(&run_id).unwrap();
    pin_mut!(events);
    let mut terminal = None;
    while let Some(event) = events.next().await {
        terminal = Some(event.event_type);
    }
    assert_eq!(terminal, Some(ExecutionEventType::Completed));

    // The graph was saved once after termination, results included.
    assert_eq!(h.repo.save_count(), saves_before + 1);
    let persisted = h.repo.load("g1").await.unwrap().unwrap();
    assert!(persisted.get_node("g1-b").unwrap().result.is_some());

    // After the sentinel is consumed the run entry is gone.
    assert!(matches!(
        h.executions.stream_execution(&run_id),
        Err(EngineError::RunNotFound(_))
    ));
    assert!(matches!(
        h.executions.cancel_execution(&run_id),
        Err(EngineError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn failed_run_still_saves_partial_results() {
    let h = harness(Arc::new(MockBackend::failing_on("g1-b-prompt")));
    h.repo.save(&sample_graph("g1")).await.unwrap();

    let run_id = h
        .executions
        .start_execution("g1", vec!["g1-b".to_string()], false)
        .await
        .unwrap();
    let events = h.executions.stream_execution(&run_id).unwrap();
    pin_mut!(events);
    let mut last = None;
    while let Some(event) = events.next().await {
        last = Some(event.event_type);
    }
    assert_eq!(last, Some(ExecutionEventType::Failed));

    let persisted = h.repo.load("g1").await.unwrap().unwrap();
    assert!(persisted.get_node("g1-a").unwrap().result.is_some());
    assert!(persisted.get_node("g1-b").unwrap().result.is_none());
}

#[tokio::test]
async fn batch_saves_each_graph_on_terminal_outcome() {
    let h = harness(Arc::new(MockBackend::new()));
    h.repo.save(&sample_graph("g1")).await.unwrap();
    h.repo.save(&sample_graph("g2")).await.unwrap();

    let batch_id = h
        .batches
        .start_batch("exp1", vec!["g1".to_string(), "g2".to_string()], false)
        .await
        .unwrap();
    let events = h.batches.stream_batch(&batch_id).unwrap();
    pin_mut!(events);
    let mut last = None;
    while let Some(event) = events.next().await {
        last = Some(event.event_type);
    }
    assert_eq!(last, Some(BatchEventType::BatchCompleted));

    for graph_id in ["g1", "g2"] {
        let persisted = h.repo.load(graph_id).await.unwrap().unwrap();
        for node in persisted.nodes() {
            assert!(node.result.is_some(), "{} has a persisted result", node.id);
        }
    }

    assert!(matches!(
        h.batches.stream_batch(&batch_id),
        Err(EngineError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn cancelled_batch_emits_batch_cancelled() {
    let h = harness(Arc::new(MockBackend::with_delay(
        std::time::Duration::from_millis(50),
    )));
    h.repo.save(&sample_graph("g1")).await.unwrap();

    let batch_id = h
        .batches
        .start_batch("exp1", vec!["g1".to_string()], false)
        .await
        .unwrap();
    h.batches.cancel_batch(&batch_id).unwrap();

    let events = h.batches.stream_batch(&batch_id).unwrap();
    pin_mut!(events);
    let mut last = None;
    while let Some(event) = events.next().await {
        last = Some(event.event_type);
    }
    assert_eq!(last, Some(BatchEventType::BatchCancelled));
}
