//! Level-synchronous single-graph executor.
//!
//! Execution walks the sub-DAG rooted at the requested outputs level by
//! level: every node in a level either skips (cached, not stale, not forced)
//! or runs concurrently with its level siblings, and the next level starts
//! only once the whole level settled. One event is emitted per node state
//! transition, in the order transitions happen.
//!
//! Cancellation is cooperative: the flag is checked between levels, so
//! in-flight handler calls run to completion and their results are still
//! recorded.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures::future::join_all;
use futures::Stream;
use serde_json::json;
use tracing::{error, info};

use crate::execution::{ExecutionContext, ExecutionEvent, ExecutionEventType, ExecutionStatus};
use crate::graph::Graph;
use crate::handlers::NodeDispatcher;
use crate::media::MediaResult;
use crate::node::NodeStatus;
use crate::resolver::InputResolver;
use crate::topology::{levels, required_nodes, topo_order};

/// Runs one graph, yielding progress events as execution proceeds.
pub struct GraphExecutor {
    dispatcher: Arc<NodeDispatcher>,
    resolver: InputResolver,
}

impl GraphExecutor {
    pub fn new(dispatcher: Arc<NodeDispatcher>, resolver: InputResolver) -> Self {
        Self {
            dispatcher,
            resolver,
        }
    }

    /// Execute the graph for the context's requested outputs.
    ///
    /// The stream yields exactly one terminal event (`completed`, `failed`,
    /// or `cancelled`); node results are written back into `graph` so the
    /// caller can persist it afterwards.
    pub fn execute<'a>(
        &'a self,
        graph: &'a mut Graph,
        context: &'a mut ExecutionContext,
        canvas_memory: &'a str,
    ) -> impl Stream<Item = ExecutionEvent> + 'a {
        stream! {
            let run_id = context.execution_id.clone();
            context.status = ExecutionStatus::Running;
            info!(execution_id = %run_id, graph_id = %context.graph_id, "execution started");
            yield ExecutionEvent::new(&run_id, ExecutionEventType::Started);

            let required = required_nodes(graph, &context.output_node_ids);
            let order: Vec<String> = topo_order(graph)
                .into_iter()
                .filter(|id| required.contains(id))
                .collect();
            let level_groups = levels(graph, &order);

            let mut results: HashMap<String, MediaResult> = HashMap::new();

            for level_nodes in level_groups {
                if context.cancelled.is_cancelled() {
                    context.status = ExecutionStatus::Cancelled;
                    info!(execution_id = %run_id, "execution cancelled");
                    yield ExecutionEvent::new(&run_id, ExecutionEventType::Cancelled);
                    return;
                }

                // Partition the level into cached skips and nodes to run.
                let mut to_run: Vec<String> = Vec::new();
                for node_id in &level_nodes {
                    let Some(node) = graph.get_node(node_id) else {
                        continue;
                    };
                    if !context.force && node.is_cached() {
                        if let Some(result) = node.result.clone() {
                            results.insert(node_id.clone(), result);
                        }
                        yield ExecutionEvent::new(&run_id, ExecutionEventType::NodeSkipped)
                            .with_node(node_id)
                            .with_data(json!({"reason": "already completed"}));
                    } else {
                        to_run.push(node_id.clone());
                    }
                }

                if to_run.is_empty() {
                    continue;
                }

                // Emit start events, resolve inputs, and collect the level's
                // handler futures before awaiting them together.
                let mut task_ids = Vec::with_capacity(to_run.len());
                let mut tasks = Vec::with_capacity(to_run.len());
                for node_id in &to_run {
                    let Some(node) = graph.get_node(node_id).cloned() else {
                        continue;
                    };
                    if let Some(node) = graph.get_node_mut(node_id) {
                        node.status = NodeStatus::Running;
                    }
                    yield ExecutionEvent::new(&run_id, ExecutionEventType::NodeStarted)
                        .with_node(node_id);

                    let inputs = self.resolver.resolve(graph, node_id, &results).await;
                    task_ids.push(node_id.clone());
                    tasks.push(async move {
                        let inputs = inputs?;
                        let result = self
                            .dispatcher
                            .execute(&node, &inputs, canvas_memory)
                            .await?;
                        Ok::<MediaResult, crate::error::EngineError>(result)
                    });
                }

                // Await all dispatched tasks of this level concurrently.
                // Sibling failures are still reported before the run stops.
                let outcomes = join_all(tasks).await;

                let mut has_failure = false;
                for (node_id, outcome) in task_ids.iter().zip(outcomes) {
                    match outcome {
                        Ok(result) => {
                            if let Some(node) = graph.get_node_mut(node_id) {
                                node.add_generation(result.clone());
                            }
                            let data = ExecutionEvent::completion_data(&result);
                            results.insert(node_id.clone(), result);
                            yield ExecutionEvent::new(&run_id, ExecutionEventType::NodeCompleted)
                                .with_node(node_id)
                                .with_data(data);
                        }
                        Err(err) => {
                            error!(execution_id = %run_id, node_id = %node_id, error = %err, "node failed");
                            if let Some(node) = graph.get_node_mut(node_id) {
                                node.status = NodeStatus::Failed;
                                node.error_message = Some(err.to_string());
                            }
                            has_failure = true;
                            yield ExecutionEvent::new(&run_id, ExecutionEventType::NodeFailed)
                                .with_node(node_id)
                                .with_data(json!({"error": err.to_string()}));
                        }
                    }
                }

                if has_failure {
                    context.status = ExecutionStatus::Failed;
                    yield ExecutionEvent::new(&run_id, ExecutionEventType::Failed)
                        .with_data(json!({"error": "one or more nodes failed"}));
                    return;
                }
            }

            context.status = ExecutionStatus::Completed;
            info!(execution_id = %run_id, "execution completed");
            yield ExecutionEvent::new(&run_id, ExecutionEventType::Completed);
        }
    }
}
