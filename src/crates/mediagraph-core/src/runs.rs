//! Run lifecycle: registries, event fan-out queues, and cancellation.
//!
//! Each active run owns a FIFO event queue and a background driver task
//! that consumes executor events and pushes them onto the queue. Clients
//! subscribe by run id and receive events until the `None` sentinel; once
//! the sentinel is consumed the run entry leaves the registry. A crash in
//! the driver task is converted into a single terminal failure event so it
//! never takes the control plane down with it.
//!
//! Persistence touchpoints: a single-graph run saves its graph once after
//! termination; a batch saves each graph when its outcome turns terminal
//! and saves all graphs again in a finalizer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::batch::{BatchContext, BatchEvent, BatchEventType, SchedulableNode};
use crate::error::{EngineError, Result};
use crate::execution::{CancelToken, ExecutionContext, ExecutionEvent, ExecutionEventType};
use crate::executor::GraphExecutor;
use crate::graph::Graph;
use crate::scheduler::{BatchScheduler, SharedGraphs};
use crate::topology::required_nodes;
use crate::traits::{CanvasMemory, GraphRepository};

/// One registered run: its cancel flag and the not-yet-claimed receiver.
struct RunEntry<E> {
    cancelled: CancelToken,
    receiver: Option<mpsc::UnboundedReceiver<Option<E>>>,
}

type Registry<E> = Arc<Mutex<HashMap<String, RunEntry<E>>>>;

fn register<E>(registry: &Registry<E>, run_id: &str) -> (CancelToken, mpsc::UnboundedSender<Option<E>>) {
    let cancelled = CancelToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    registry.lock().insert(
        run_id.to_string(),
        RunEntry {
            cancelled: cancelled.clone(),
            receiver: Some(rx),
        },
    );
    (cancelled, tx)
}

/// Claim a run's receiver and wrap it in a stream that drains until the
/// sentinel, then drops the registry entry.
fn subscribe<E: Send + 'static>(
    registry: &Registry<E>,
    run_id: &str,
) -> Result<impl Stream<Item = E> + 'static> {
    let mut receiver = {
        let mut runs = registry.lock();
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        entry
            .receiver
            .take()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?
    };
    let registry = Arc::clone(registry);
    let run_id = run_id.to_string();
    Ok(stream! {
        while let Some(message) = receiver.recv().await {
            match message {
                Some(event) => yield event,
                None => break,
            }
        }
        registry.lock().remove(&run_id);
    })
}

fn cancel<E>(registry: &Registry<E>, run_id: &str) -> Result<()> {
    let runs = registry.lock();
    let entry = runs
        .get(run_id)
        .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
    entry.cancelled.cancel();
    Ok(())
}

/// Start, stream, and cancel single-graph executions.
pub struct ExecutionManager {
    executor: Arc<GraphExecutor>,
    repo: Arc<dyn GraphRepository>,
    memory: Arc<dyn CanvasMemory>,
    runs: Registry<ExecutionEvent>,
}

impl ExecutionManager {
    pub fn new(
        executor: Arc<GraphExecutor>,
        repo: Arc<dyn GraphRepository>,
        memory: Arc<dyn CanvasMemory>,
    ) -> Self {
        Self {
            executor,
            repo,
            memory,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocate a run, start the background driver, and return the run id
    /// for streaming and cancellation.
    pub async fn start_execution(
        &self,
        graph_id: &str,
        output_node_ids: Vec<String>,
        force: bool,
    ) -> Result<String> {
        let mut graph = self
            .repo
            .load(graph_id)
            .await?
            .ok_or_else(|| EngineError::GraphNotFound(graph_id.to_string()))?;

        let execution_id = Uuid::new_v4().to_string();
        let (cancelled, tx) = register(&self.runs, &execution_id);
        let mut context = ExecutionContext::new(&execution_id, graph_id, output_node_ids, force);
        context.cancelled = cancelled;

        let executor = Arc::clone(&self.executor);
        let repo = Arc::clone(&self.repo);
        let memory = Arc::clone(&self.memory);
        let run_id = execution_id.clone();

        tokio::spawn(async move {
            let outcome: Result<()> = async {
                let canvas_memory = memory.resolve(&graph).await?;
                {
                    let events = executor.execute(&mut graph, &mut context, &canvas_memory);
                    pin_mut!(events);
                    while let Some(event) = events.next().await {
                        let _ = tx.send(Some(event));
                    }
                }
                // Node results and history survive through one save at
                // termination, whatever the terminal state was.
                repo.save(&graph).await?;
                Ok(())
            }
            .await;

            if let Err(err) = outcome {
                error!(execution_id = %run_id, error = %err, "execution driver crashed");
                let _ = tx.send(Some(
                    ExecutionEvent::new(&run_id, ExecutionEventType::Failed)
                        .with_data(json!({"error": err.to_string()})),
                ));
            }
            let _ = tx.send(None);
        });

        Ok(execution_id)
    }

    /// Subscribe to a run's event stream. Each run supports one subscriber;
    /// the entry is removed once the stream is drained.
    pub fn stream_execution(
        &self,
        execution_id: &str,
    ) -> Result<impl Stream<Item = ExecutionEvent> + 'static> {
        subscribe(&self.runs, execution_id)
    }

    /// Cooperatively cancel a run. In-flight nodes finish; nothing new is
    /// dispatched.
    pub fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        info!(execution_id = %execution_id, "cancellation requested");
        cancel(&self.runs, execution_id)
    }
}

/// Start, stream, and cancel batch (multi-graph) executions.
pub struct BatchManager {
    scheduler: Arc<BatchScheduler>,
    repo: Arc<dyn GraphRepository>,
    memory: Arc<dyn CanvasMemory>,
    runs: Registry<BatchEvent>,
}

impl BatchManager {
    pub fn new(
        scheduler: Arc<BatchScheduler>,
        repo: Arc<dyn GraphRepository>,
        memory: Arc<dyn CanvasMemory>,
    ) -> Self {
        Self {
            scheduler,
            repo,
            memory,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load all graphs, flatten them into one schedulable pool, and start
    /// the batch driver. Returns the batch id.
    pub async fn start_batch(
        &self,
        experiment_id: &str,
        graph_ids: Vec<String>,
        force: bool,
    ) -> Result<String> {
        let batch_id = Uuid::new_v4().to_string();

        let mut graphs: HashMap<String, Graph> = HashMap::new();
        let mut pool: Vec<SchedulableNode> = Vec::new();
        for graph_id in &graph_ids {
            let graph = self
                .repo
                .load(graph_id)
                .await?
                .ok_or_else(|| EngineError::GraphNotFound(graph_id.clone()))?;
            let canvas_memory = self.memory.resolve(&graph).await?;

            // Every node of every graph is an output in a batch run.
            let all_ids: Vec<String> = graph.node_ids().map(str::to_string).collect();
            let required = required_nodes(&graph, &all_ids);
            for node in graph.nodes() {
                if !required.contains(&node.id) {
                    continue;
                }
                let dependencies: HashSet<String> = graph
                    .get_dependencies(&node.id)
                    .into_iter()
                    .filter(|dep| required.contains(dep))
                    .collect();
                pool.push(SchedulableNode {
                    node_id: node.id.clone(),
                    graph_id: graph_id.clone(),
                    node_type: node.node_type,
                    dependencies,
                    canvas_memory: canvas_memory.clone(),
                });
            }
            graphs.insert(graph_id.clone(), graph);
        }

        let (cancelled, tx) = register(&self.runs, &batch_id);
        let mut context = BatchContext::new(&batch_id, experiment_id, graph_ids, force);
        context.cancelled = cancelled;

        let shared: SharedGraphs = Arc::new(Mutex::new(graphs));
        let scheduler = Arc::clone(&self.scheduler);
        let repo = Arc::clone(&self.repo);
        let run_id = batch_id.clone();

        tokio::spawn(async move {
            let events = scheduler.execute(pool, context, Arc::clone(&shared));
            pin_mut!(events);
            while let Some(event) = events.next().await {
                let terminal_graph = matches!(
                    event.event_type,
                    BatchEventType::GraphCompleted | BatchEventType::GraphFailed
                )
                .then(|| event.graph_id.clone())
                .flatten();

                let _ = tx.send(Some(event));

                // Save a graph as soon as its outcome is terminal so its
                // results survive even if the batch later crashes.
                if let Some(graph_id) = terminal_graph {
                    let snapshot = shared.lock().get(&graph_id).cloned();
                    if let Some(graph) = snapshot {
                        if let Err(err) = repo.save(&graph).await {
                            error!(batch_id = %run_id, graph_id = %graph_id, error = %err, "failed to save graph");
                        }
                    }
                }
            }

            // Finalizer: persist every graph in the batch.
            let snapshots: Vec<Graph> = shared.lock().values().cloned().collect();
            for graph in snapshots {
                if let Err(err) = repo.save(&graph).await {
                    error!(batch_id = %run_id, graph_id = %graph.id, error = %err, "failed to save graph after batch");
                }
            }
            let _ = tx.send(None);
        });

        Ok(batch_id)
    }

    /// Subscribe to a batch's event stream.
    pub fn stream_batch(
        &self,
        batch_id: &str,
    ) -> Result<impl Stream<Item = BatchEvent> + 'static> {
        subscribe(&self.runs, batch_id)
    }

    /// Cooperatively cancel a batch.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        info!(batch_id = %batch_id, "batch cancellation requested");
        cancel(&self.runs, batch_id)
    }
}
