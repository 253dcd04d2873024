//! Global DAG-aware batch scheduler with per-type concurrency control.
//!
//! Flattens multiple graphs into a single node pool and executes them with
//! dependency-aware scheduling, per-[`NodeType`] semaphores, and per-graph
//! failure isolation: one failing graph poisons only its own remaining
//! nodes while every other graph keeps running.
//!
//! All mutable scheduler state lives in one [`SchedulerState`] behind a
//! `parking_lot::Mutex` that is never held across an await, which preserves
//! the atomic-between-suspension-points reasoning of a cooperative
//! scheduler while worker tasks run on a multi-threaded runtime. Events
//! flow from workers through an unbounded channel to the drain loop; a
//! `None` sentinel posted when the last node is accounted for terminates
//! the stream.
//!
//! Accounting invariant: every pooled node decrements `remaining` exactly
//! once — skipped nodes in the pre-pass, launched nodes in their worker
//! (whether they ran, were cancelled, or bailed because their graph
//! failed), and never-launched nodes of a failed graph at poisoning time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::batch::{
    default_type_configs, BatchContext, BatchEvent, BatchEventType, BatchStatus, GraphOutcome,
    NodeTypeConfig, SchedulableNode, DEFAULT_TYPE_CONCURRENCY,
};
use crate::execution::CancelToken;
use crate::graph::Graph;
use crate::handlers::NodeDispatcher;
use crate::media::MediaResult;
use crate::node::{NodeStatus, NodeType};
use crate::resolver::InputResolver;

/// The graphs a batch mutates, shared between the scheduler's workers and
/// the lifecycle layer that persists them.
pub type SharedGraphs = Arc<Mutex<HashMap<String, Graph>>>;

/// Event-driven scheduler that executes nodes from multiple graphs in a
/// single global pool.
pub struct BatchScheduler {
    dispatcher: Arc<NodeDispatcher>,
    resolver: InputResolver,
    type_configs: HashMap<NodeType, NodeTypeConfig>,
}

impl BatchScheduler {
    pub fn new(dispatcher: Arc<NodeDispatcher>, resolver: InputResolver) -> Self {
        Self::with_configs(dispatcher, resolver, default_type_configs())
    }

    pub fn with_configs(
        dispatcher: Arc<NodeDispatcher>,
        resolver: InputResolver,
        type_configs: HashMap<NodeType, NodeTypeConfig>,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            type_configs,
        }
    }

    /// Schedule and execute all pooled nodes, yielding events as nodes
    /// start, complete, skip, or fail. Node results are written back into
    /// `graphs` for persistence.
    pub fn execute(
        &self,
        pool: Vec<SchedulableNode>,
        mut context: BatchContext,
        graphs: SharedGraphs,
    ) -> impl Stream<Item = BatchEvent> + 'static {
        let dispatcher = Arc::clone(&self.dispatcher);
        let resolver = self.resolver.clone();
        let type_configs = self.type_configs.clone();

        stream! {
            let batch_id = context.batch_id.clone();

            if pool.is_empty() {
                context.status = BatchStatus::Completed;
                yield BatchEvent::new(&batch_id, BatchEventType::BatchStarted)
                    .with_data(json!({"graph_ids": context.graph_ids, "total_nodes": 0}));
                yield BatchEvent::new(&batch_id, BatchEventType::BatchCompleted)
                    .with_data(json!({"graph_outcomes": {}}));
                return;
            }

            context.status = BatchStatus::Running;
            info!(batch_id = %batch_id, graphs = context.graph_ids.len(), nodes = pool.len(), "batch started");
            yield BatchEvent::new(&batch_id, BatchEventType::BatchStarted)
                .with_data(json!({
                    "graph_ids": context.graph_ids,
                    "total_nodes": pool.len(),
                }));

            let semaphores = SemaphoreTable::new(&type_configs);
            let state = Arc::new(Mutex::new(SchedulerState::new(&pool, &context.graph_ids)));
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Option<BatchEvent>>();

            let worker_ctx = WorkerCtx {
                batch_id: batch_id.clone(),
                dispatcher,
                resolver,
                semaphores: Arc::new(semaphores),
                state: Arc::clone(&state),
                graphs: Arc::clone(&graphs),
                cancelled: context.cancelled.clone(),
                event_tx,
            };

            // Pre-pass: nodes that are already cached skip without running,
            // immediately unblocking their children.
            for sn in &pool {
                let cached_result = {
                    let graphs = graphs.lock();
                    graphs
                        .get(&sn.graph_id)
                        .and_then(|g| g.get_node(&sn.node_id))
                        .filter(|n| !context.force && n.is_cached())
                        .and_then(|n| n.result.clone())
                };
                if let Some(result) = cached_result {
                    state.lock().mark_skipped(sn, result);
                    yield BatchEvent::new(&batch_id, BatchEventType::NodeSkipped)
                        .with_graph(&sn.graph_id)
                        .with_node(&sn.node_id)
                        .with_data(json!({"reason": "already completed"}));
                }
            }

            // Graphs fully satisfied by the pre-pass complete right away.
            let complete_now: Vec<String> = {
                let mut st = state.lock();
                let done: Vec<String> = context
                    .graph_ids
                    .iter()
                    .filter(|gid| {
                        st.is_graph_complete(gid) && st.outcome(gid) == GraphOutcome::Pending
                    })
                    .cloned()
                    .collect();
                for gid in &done {
                    st.set_outcome(gid, GraphOutcome::Completed);
                }
                done
            };
            for gid in complete_now {
                yield BatchEvent::new(&batch_id, BatchEventType::GraphCompleted).with_graph(&gid);
            }

            let remaining = {
                let st = state.lock();
                st.remaining
            };
            if remaining == 0 {
                context.status = BatchStatus::Completed;
                let outcomes = state.lock().outcome_map(&context.graph_ids);
                yield BatchEvent::new(&batch_id, BatchEventType::BatchCompleted)
                    .with_data(json!({"graph_outcomes": outcomes}));
                return;
            }

            // Initial dispatch: every dependency-free node whose graph is
            // healthy, highest priority first.
            let initial = state.lock().take_ready_nodes(&type_configs);
            for sn in initial {
                spawn_worker(worker_ctx.clone(), sn);
            }

            // Drain worker events until the sentinel arrives.
            while let Some(message) = event_rx.recv().await {
                match message {
                    Some(event) => yield event,
                    None => break,
                }
            }

            if context.cancelled.is_cancelled() {
                context.status = BatchStatus::Cancelled;
                warn!(batch_id = %batch_id, "batch cancelled");
                yield BatchEvent::new(&batch_id, BatchEventType::BatchCancelled);
            } else {
                context.status = BatchStatus::Completed;
                let outcomes = state.lock().outcome_map(&context.graph_ids);
                info!(batch_id = %batch_id, "batch completed");
                yield BatchEvent::new(&batch_id, BatchEventType::BatchCompleted)
                    .with_data(json!({"graph_outcomes": outcomes}));
            }
        }
    }
}

/// Per-type semaphores enforcing `max_concurrency`; unconfigured types
/// share one default-capacity semaphore.
struct SemaphoreTable {
    by_type: HashMap<NodeType, Arc<Semaphore>>,
    default: Arc<Semaphore>,
}

impl SemaphoreTable {
    fn new(configs: &HashMap<NodeType, NodeTypeConfig>) -> Self {
        Self {
            by_type: configs
                .iter()
                .map(|(ty, cfg)| (*ty, Arc::new(Semaphore::new(cfg.max_concurrency))))
                .collect(),
            default: Arc::new(Semaphore::new(DEFAULT_TYPE_CONCURRENCY)),
        }
    }

    fn get(&self, node_type: NodeType) -> Arc<Semaphore> {
        self.by_type
            .get(&node_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Everything a worker task needs; cheap to clone per spawn.
#[derive(Clone)]
struct WorkerCtx {
    batch_id: String,
    dispatcher: Arc<NodeDispatcher>,
    resolver: InputResolver,
    semaphores: Arc<SemaphoreTable>,
    state: Arc<Mutex<SchedulerState>>,
    graphs: SharedGraphs,
    cancelled: CancelToken,
    event_tx: mpsc::UnboundedSender<Option<BatchEvent>>,
}

impl WorkerCtx {
    fn emit(&self, event: BatchEvent) {
        // The drain loop owns the receiver for the whole run; a send only
        // fails once the stream itself is gone, at which point events have
        // no audience anyway.
        let _ = self.event_tx.send(Some(event));
    }

    /// Charge one node against `remaining`; post the sentinel when the
    /// last node is accounted for.
    fn finish_one(&self) {
        let mut st = self.state.lock();
        st.remaining -= 1;
        if st.remaining == 0 {
            let _ = self.event_tx.send(None);
        }
    }
}

fn spawn_worker(ctx: WorkerCtx, sn: SchedulableNode) {
    tokio::spawn(async move { run_node(ctx, sn).await });
}

/// Execute a single node: acquire the type's semaphore, run the handler,
/// record the result, promote newly ready children.
async fn run_node(ctx: WorkerCtx, sn: SchedulableNode) {
    let semaphore = ctx.semaphores.get(sn.node_type);
    let Ok(_permit) = semaphore.acquire_owned().await else {
        // Semaphores are never closed while the batch is alive.
        ctx.finish_one();
        return;
    };

    // A cancel or a sibling failure that landed while we waited for the
    // slot means this node must not run. Its children are still promoted so
    // the pool drains and the sentinel fires.
    if ctx.cancelled.is_cancelled() || ctx.state.lock().is_graph_failed(&sn.graph_id) {
        ctx.state.lock().mark_finished_without_running(&sn.node_id);
        let children = ctx.state.lock().promote_children(&sn.node_id);
        for child in children {
            spawn_worker(ctx.clone(), child);
        }
        ctx.finish_one();
        return;
    }

    {
        let mut graphs = ctx.graphs.lock();
        if let Some(node) = graphs
            .get_mut(&sn.graph_id)
            .and_then(|g| g.get_node_mut(&sn.node_id))
        {
            node.status = NodeStatus::Running;
        }
    }
    ctx.emit(
        BatchEvent::new(&ctx.batch_id, BatchEventType::NodeStarted)
            .with_graph(&sn.graph_id)
            .with_node(&sn.node_id),
    );

    // Snapshot the node, its graph's edges, and the dependency results so
    // no lock is held across the backend call.
    let snapshot = {
        let graphs = ctx.graphs.lock();
        graphs.get(&sn.graph_id).and_then(|g| {
            g.get_node(&sn.node_id)
                .cloned()
                .map(|node| (node, g.edges().to_vec()))
        })
    };
    let dep_results: HashMap<String, MediaResult> = {
        let st = ctx.state.lock();
        sn.dependencies
            .iter()
            .filter_map(|dep| st.results.get(dep).map(|r| (dep.clone(), r.clone())))
            .collect()
    };

    let outcome = match snapshot {
        Some((node, edges)) => match ctx.resolver.resolve_node(&node, &edges, &dep_results).await {
            Ok(inputs) => ctx.dispatcher.execute(&node, &inputs, &sn.canvas_memory).await,
            Err(err) => Err(err),
        },
        None => Err(crate::error::EngineError::NodeNotFound(sn.node_id.clone())),
    };

    match outcome {
        Ok(result) => {
            {
                let mut graphs = ctx.graphs.lock();
                if let Some(node) = graphs
                    .get_mut(&sn.graph_id)
                    .and_then(|g| g.get_node_mut(&sn.node_id))
                {
                    node.add_generation(result.clone());
                }
            }
            let graph_complete = {
                let mut st = ctx.state.lock();
                st.mark_completed(&sn, result.clone());
                st.is_graph_complete(&sn.graph_id) && !st.is_graph_failed(&sn.graph_id)
            };

            ctx.emit(
                BatchEvent::new(&ctx.batch_id, BatchEventType::NodeCompleted)
                    .with_graph(&sn.graph_id)
                    .with_node(&sn.node_id)
                    .with_data(json!({
                        "media_type": result.media_type,
                        "urls": result.urls,
                    })),
            );

            if graph_complete {
                ctx.state
                    .lock()
                    .set_outcome(&sn.graph_id, GraphOutcome::Completed);
                ctx.emit(
                    BatchEvent::new(&ctx.batch_id, BatchEventType::GraphCompleted)
                        .with_graph(&sn.graph_id),
                );
            }

            let children = ctx.state.lock().promote_children(&sn.node_id);
            for child in children {
                spawn_worker(ctx.clone(), child);
            }
        }
        Err(err) => {
            error!(
                batch_id = %ctx.batch_id,
                graph_id = %sn.graph_id,
                node_id = %sn.node_id,
                error = %err,
                "node failed, poisoning graph"
            );
            {
                let mut graphs = ctx.graphs.lock();
                if let Some(node) = graphs
                    .get_mut(&sn.graph_id)
                    .and_then(|g| g.get_node_mut(&sn.node_id))
                {
                    node.status = NodeStatus::Failed;
                    node.error_message = Some(err.to_string());
                }
            }
            ctx.state.lock().mark_graph_failed(&sn);

            ctx.emit(
                BatchEvent::new(&ctx.batch_id, BatchEventType::NodeFailed)
                    .with_graph(&sn.graph_id)
                    .with_node(&sn.node_id)
                    .with_data(json!({"error": err.to_string()})),
            );
            ctx.emit(
                BatchEvent::new(&ctx.batch_id, BatchEventType::GraphFailed)
                    .with_graph(&sn.graph_id)
                    .with_data(json!({"error": err.to_string()})),
            );
        }
    }

    ctx.finish_one();
}

/// Centralized mutable scheduler state.
///
/// Mutated only while the lock is held, never across an await.
struct SchedulerState {
    pool: Vec<SchedulableNode>,
    pool_index: HashMap<String, usize>,
    pending_deps: HashMap<String, i64>,
    children: HashMap<String, HashSet<String>>,
    graph_total: HashMap<String, usize>,
    graph_done: HashMap<String, usize>,
    results: HashMap<String, MediaResult>,
    finished: HashSet<String>,
    launched: HashSet<String>,
    failed_graphs: HashSet<String>,
    graph_outcomes: HashMap<String, GraphOutcome>,
    remaining: i64,
}

impl SchedulerState {
    fn new(pool: &[SchedulableNode], graph_ids: &[String]) -> Self {
        let pool_index: HashMap<String, usize> = pool
            .iter()
            .enumerate()
            .map(|(i, sn)| (sn.node_id.clone(), i))
            .collect();

        let mut pending_deps: HashMap<String, i64> = HashMap::new();
        let mut children: HashMap<String, HashSet<String>> = pool
            .iter()
            .map(|sn| (sn.node_id.clone(), HashSet::new()))
            .collect();
        for sn in pool {
            let valid: Vec<&String> = sn
                .dependencies
                .iter()
                .filter(|dep| pool_index.contains_key(*dep))
                .collect();
            pending_deps.insert(sn.node_id.clone(), valid.len() as i64);
            for dep in valid {
                children.get_mut(dep).unwrap().insert(sn.node_id.clone());
            }
        }

        let mut graph_total: HashMap<String, usize> = HashMap::new();
        for sn in pool {
            *graph_total.entry(sn.graph_id.clone()).or_insert(0) += 1;
        }

        Self {
            remaining: pool.len() as i64,
            pool: pool.to_vec(),
            pool_index,
            pending_deps,
            children,
            graph_done: graph_total.keys().map(|g| (g.clone(), 0)).collect(),
            graph_total,
            results: HashMap::new(),
            finished: HashSet::new(),
            launched: HashSet::new(),
            failed_graphs: HashSet::new(),
            graph_outcomes: graph_ids
                .iter()
                .map(|gid| (gid.clone(), GraphOutcome::Pending))
                .collect(),
        }
    }

    /// Pre-pass skip: record the cached result, finish the node, and
    /// unblock its children.
    fn mark_skipped(&mut self, sn: &SchedulableNode, result: MediaResult) {
        self.results.insert(sn.node_id.clone(), result);
        self.finished.insert(sn.node_id.clone());
        self.launched.insert(sn.node_id.clone());
        *self.graph_done.entry(sn.graph_id.clone()).or_insert(0) += 1;
        self.remaining -= 1;
        if let Some(children) = self.children.get(&sn.node_id) {
            for child in children.clone() {
                *self.pending_deps.get_mut(&child).unwrap() -= 1;
            }
        }
    }

    fn mark_completed(&mut self, sn: &SchedulableNode, result: MediaResult) {
        self.results.insert(sn.node_id.clone(), result);
        if self.finished.insert(sn.node_id.clone()) {
            *self.graph_done.entry(sn.graph_id.clone()).or_insert(0) += 1;
        }
    }

    /// A launched node that bailed before running (cancelled batch or
    /// poisoned graph). Charged by its own worker, not here.
    fn mark_finished_without_running(&mut self, node_id: &str) {
        self.finished.insert(node_id.to_string());
    }

    /// Poison a graph: mark the failing node finished, record the failed
    /// outcome, and charge every node of the graph that was never launched
    /// (launched nodes charge themselves when their workers wind down).
    fn mark_graph_failed(&mut self, sn: &SchedulableNode) {
        self.finished.insert(sn.node_id.clone());
        self.failed_graphs.insert(sn.graph_id.clone());
        self.graph_outcomes
            .insert(sn.graph_id.clone(), GraphOutcome::Failed);

        let orphaned: Vec<String> = self
            .pool
            .iter()
            .filter(|other| {
                other.graph_id == sn.graph_id
                    && !self.finished.contains(&other.node_id)
                    && !self.launched.contains(&other.node_id)
            })
            .map(|other| other.node_id.clone())
            .collect();
        for node_id in orphaned {
            self.finished.insert(node_id);
            self.remaining -= 1;
        }
    }

    fn is_graph_failed(&self, graph_id: &str) -> bool {
        self.failed_graphs.contains(graph_id)
    }

    fn is_graph_complete(&self, graph_id: &str) -> bool {
        self.graph_done.get(graph_id).copied().unwrap_or(0)
            >= self.graph_total.get(graph_id).copied().unwrap_or(0)
    }

    fn outcome(&self, graph_id: &str) -> GraphOutcome {
        self.graph_outcomes
            .get(graph_id)
            .copied()
            .unwrap_or(GraphOutcome::Pending)
    }

    fn set_outcome(&mut self, graph_id: &str, outcome: GraphOutcome) {
        self.graph_outcomes.insert(graph_id.to_string(), outcome);
    }

    fn outcome_map(&self, graph_ids: &[String]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = graph_ids
            .iter()
            .map(|gid| {
                (
                    gid.clone(),
                    serde_json::to_value(self.outcome(gid)).unwrap_or_default(),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// All dependency-free, unlaunched nodes of healthy graphs, marked
    /// launched and returned highest-priority first (ties keep pool order).
    fn take_ready_nodes(
        &mut self,
        configs: &HashMap<NodeType, NodeTypeConfig>,
    ) -> Vec<SchedulableNode> {
        let mut ready: Vec<SchedulableNode> = self
            .pool
            .iter()
            .filter(|sn| {
                self.pending_deps.get(&sn.node_id).copied().unwrap_or(0) <= 0
                    && !self.launched.contains(&sn.node_id)
                    && !self.failed_graphs.contains(&sn.graph_id)
            })
            .cloned()
            .collect();
        ready.sort_by_key(|sn| std::cmp::Reverse(priority_of(configs, sn.node_type)));
        for sn in &ready {
            self.launched.insert(sn.node_id.clone());
        }
        ready
    }

    /// Decrement dependency counts for the children of a finished node and
    /// return the ones that just became ready, marked launched.
    fn promote_children(&mut self, parent_id: &str) -> Vec<SchedulableNode> {
        let Some(children) = self.children.get(parent_id) else {
            return Vec::new();
        };
        let mut child_ids: Vec<String> = children.iter().cloned().collect();
        child_ids.sort_by_key(|id| self.pool_index.get(id).copied().unwrap_or(usize::MAX));

        let mut newly_ready = Vec::new();
        for child_id in child_ids {
            let deps = self.pending_deps.get_mut(&child_id).unwrap();
            *deps -= 1;
            if *deps <= 0
                && !self.launched.contains(&child_id)
                && !self.finished.contains(&child_id)
            {
                let sn = &self.pool[self.pool_index[&child_id]];
                if !self.failed_graphs.contains(&sn.graph_id) {
                    self.launched.insert(child_id.clone());
                    newly_ready.push(sn.clone());
                }
            }
        }
        newly_ready
    }
}

fn priority_of(configs: &HashMap<NodeType, NodeTypeConfig>, node_type: NodeType) -> i32 {
    configs.get(&node_type).map(|c| c.priority).unwrap_or(0)
}
