//! Per-run execution state and the events a run streams to its clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::media::MediaResult;

/// Cooperative cancellation flag shared between a run's driver and the
/// control plane. Setting it stops new dispatch at the next scheduling
/// decision point; in-flight handler calls run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal and intermediate states of a single-graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// State of one execution attempt of a graph.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub graph_id: String,
    pub output_node_ids: Vec<String>,
    /// Re-run cached nodes instead of skipping them.
    pub force: bool,
    pub status: ExecutionStatus,
    pub cancelled: CancelToken,
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<String>,
        graph_id: impl Into<String>,
        output_node_ids: Vec<String>,
        force: bool,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            graph_id: graph_id.into(),
            output_node_ids,
            force,
            status: ExecutionStatus::Pending,
            cancelled: CancelToken::new(),
        }
    }
}

/// Event kinds a single-graph run emits, in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventType {
    Started,
    NodeStarted,
    NodeSkipped,
    NodeCompleted,
    NodeFailed,
    Cancelled,
    Completed,
    Failed,
}

/// One event on a run's stream.
///
/// Events are delivered to subscribers in the order the executor produces
/// them; `node_started` for a node always precedes its terminal node event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: String,
    pub event_type: ExecutionEventType,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionEvent {
    pub fn new(execution_id: &str, event_type: ExecutionEventType) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            event_type,
            timestamp: chrono::Utc::now().timestamp(),
            node_id: None,
            data: None,
        }
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Payload for a successful node completion.
    pub fn completion_data(result: &MediaResult) -> Value {
        json!({
            "media_type": result.media_type,
            "urls": result.urls,
        })
    }
}
