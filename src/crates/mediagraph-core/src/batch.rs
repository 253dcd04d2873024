//! Batch (multi-graph) execution models.
//!
//! A batch flattens several graphs into one node pool so cheap nodes from
//! one graph keep the backend busy while another graph waits on a scarce
//! slot. [`NodeTypeConfig`] encodes the relative cost and throughput of the
//! external backends as per-type concurrency caps and scheduling priority.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::CancelToken;
use crate::node::NodeType;

/// Per-type concurrency and priority settings.
///
/// Priority is advisory: higher values win ties among ready nodes, but a
/// launched node is never pre-empted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTypeConfig {
    pub max_concurrency: usize,
    pub priority: i32,
}

impl NodeTypeConfig {
    pub const fn new(max_concurrency: usize, priority: i32) -> Self {
        Self {
            max_concurrency,
            priority,
        }
    }
}

/// Concurrency cap applied to node types without an explicit config entry.
pub const DEFAULT_TYPE_CONCURRENCY: usize = 4;

/// The default scheduling table: cheap, fast calls run wide and first;
/// video holds its scarce slots for minutes at a time.
pub fn default_type_configs() -> HashMap<NodeType, NodeTypeConfig> {
    HashMap::from([
        (NodeType::GenerateText, NodeTypeConfig::new(10, 5)),
        (NodeType::AnalyzeImage, NodeTypeConfig::new(8, 6)),
        (NodeType::GenerateImage, NodeTypeConfig::new(4, 3)),
        (NodeType::TransformImage, NodeTypeConfig::new(4, 3)),
        (NodeType::GenerateSpeech, NodeTypeConfig::new(4, 4)),
        (NodeType::GenerateMusic, NodeTypeConfig::new(3, 2)),
        (NodeType::GenerateVideo, NodeTypeConfig::new(2, 1)),
    ])
}

/// A work unit in the global scheduler: one node, tagged with the graph it
/// belongs to, its dependencies within the batch, and its graph's canvas
/// memory.
#[derive(Debug, Clone)]
pub struct SchedulableNode {
    pub node_id: String,
    pub graph_id: String,
    pub node_type: NodeType,
    /// Dependency node ids, already restricted to the batch pool.
    pub dependencies: HashSet<String>,
    pub canvas_memory: String,
}

/// Overall state of a batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal (or pending) outcome of one graph within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOutcome {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Run-wide record for one batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_id: String,
    pub experiment_id: String,
    pub graph_ids: Vec<String>,
    pub force: bool,
    pub status: BatchStatus,
    pub cancelled: CancelToken,
}

impl BatchContext {
    pub fn new(
        batch_id: impl Into<String>,
        experiment_id: impl Into<String>,
        graph_ids: Vec<String>,
        force: bool,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            experiment_id: experiment_id.into(),
            graph_ids,
            force,
            status: BatchStatus::Pending,
            cancelled: CancelToken::new(),
        }
    }
}

/// Event kinds a batch emits, in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEventType {
    BatchStarted,
    NodeStarted,
    NodeSkipped,
    NodeCompleted,
    NodeFailed,
    GraphCompleted,
    GraphFailed,
    BatchCancelled,
    BatchCompleted,
}

/// One event on a batch's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub batch_id: String,
    pub event_type: BatchEventType,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BatchEvent {
    pub fn new(batch_id: &str, event_type: BatchEventType) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            event_type,
            timestamp: chrono::Utc::now().timestamp(),
            graph_id: None,
            node_id: None,
            data: None,
        }
    }

    pub fn with_graph(mut self, graph_id: &str) -> Self {
        self.graph_id = Some(graph_id.to_string());
        self
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_backend_costs() {
        let configs = default_type_configs();
        assert_eq!(configs.len(), NodeType::ALL.len());
        assert_eq!(configs[&NodeType::GenerateText].max_concurrency, 10);
        assert_eq!(configs[&NodeType::GenerateVideo].max_concurrency, 2);
        // Vision outranks everything; video yields to all.
        let max_priority = configs.values().map(|c| c.priority).max().unwrap();
        assert_eq!(configs[&NodeType::AnalyzeImage].priority, max_priority);
        let min_priority = configs.values().map(|c| c.priority).min().unwrap();
        assert_eq!(configs[&NodeType::GenerateVideo].priority, min_priority);
    }

    #[test]
    fn batch_event_wire_form() {
        let event = BatchEvent::new("b1", BatchEventType::GraphFailed).with_graph("g1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "graph_failed");
        assert_eq!(value["graph_id"], "g1");
        assert!(value.get("node_id").is_none());
    }
}
