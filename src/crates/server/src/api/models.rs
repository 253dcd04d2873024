//! Request/response DTOs for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mediagraph_core::node::{NodeType, Position};

#[derive(Debug, Deserialize)]
pub struct CreateGraphRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGraphRequest {
    pub name: Option<String>,
    pub canvas_memory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub position: Position,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNodeRequest {
    pub label: Option<String>,
    pub params: Option<Map<String, Value>>,
    pub position: Option<Position>,
}

impl UpdateNodeRequest {
    /// Params and label affect generated content; position is cosmetic.
    pub fn has_content_change(&self) -> bool {
        self.params.is_some() || self.label.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct RegenerateNodeRequest {
    #[serde(default = "default_true")]
    pub create_variant: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    pub from_node_id: String,
    pub from_port_id: String,
    pub to_node_id: String,
    pub to_port_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteGraphRequest {
    pub graph_id: String,
    #[serde(default)]
    pub output_node_ids: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct StartExecutionResponse {
    pub execution_id: String,
    pub stream_url: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchExecuteRequest {
    pub experiment_id: String,
    pub graph_ids: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub batch_id: String,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
