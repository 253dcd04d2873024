//! Node CRUD endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use mediagraph_core::node::{Node, NodeStatus};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{CreateNodeRequest, RegenerateNodeRequest, UpdateNodeRequest};
use crate::api::routes::AppState;

/// POST /api/graphs/:graph_id/nodes
pub async fn create_node(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Json(req): Json<CreateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;

    let mut node = Node::new(
        Uuid::new_v4().to_string(),
        req.node_type,
        req.label,
        req.params,
        req.position,
    );
    if let Some(provider) = req.provider {
        node.provider = provider;
    }
    graph.add_node(node.clone());
    state.repo.save(&graph).await?;
    Ok(Json(node))
}

/// PATCH /api/graphs/:graph_id/nodes/:node_id
///
/// Param and label updates are content-affecting: the node and everything
/// downstream of it go stale. Position updates are cosmetic.
pub async fn update_node(
    State(state): State<AppState>,
    Path((graph_id, node_id)): Path<(String, String)>,
    Json(req): Json<UpdateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;
    let has_content_change = req.has_content_change();

    {
        let node = graph
            .get_node_mut(&node_id)
            .ok_or_else(|| ApiError::NotFound(format!("node not found: {node_id}")))?;

        if let Some(mut params) = req.params {
            // A prompt edited by hand is flagged so downstream tooling can
            // tell it apart from synthesized prompts.
            if params.contains_key("prompt") {
                params.insert("human_edited".to_string(), Value::Bool(true));
            }
            for (key, value) in params {
                node.params.insert(key, value);
            }
        }
        if let Some(label) = req.label {
            node.label = label;
        }
        if let Some(position) = req.position {
            node.position = position;
        }
    }

    if has_content_change {
        graph.mark_stale(&node_id);
    }

    state.repo.save(&graph).await?;
    let node = graph.get_node(&node_id).cloned().ok_or_else(|| {
        ApiError::Internal("node vanished during update".to_string())
    })?;
    Ok(Json(node))
}

/// DELETE /api/graphs/:graph_id/nodes/:node_id
pub async fn delete_node(
    State(state): State<AppState>,
    Path((graph_id, node_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;
    if graph.get_node(&node_id).is_none() {
        return Err(ApiError::NotFound(format!("node not found: {node_id}")));
    }

    graph.remove_node(&node_id);
    state.store.delete_node_media(&node_id).await?;
    state.repo.save(&graph).await?;
    Ok(Json(serde_json::json!({"message": "Node deleted"})))
}

/// POST /api/graphs/:graph_id/nodes/:node_id/regenerate
///
/// Reset a node so the next run re-executes it. Without `create_variant`
/// the current result is dropped instead of being kept as a prior
/// generation.
pub async fn regenerate_node(
    State(state): State<AppState>,
    Path((graph_id, node_id)): Path<(String, String)>,
    Json(req): Json<RegenerateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;

    let node = graph
        .get_node_mut(&node_id)
        .ok_or_else(|| ApiError::NotFound(format!("node not found: {node_id}")))?;
    if !req.create_variant {
        node.result = None;
    }
    node.status = NodeStatus::Idle;
    node.error_message = None;
    let node = node.clone();

    state.repo.save(&graph).await?;
    Ok(Json(node))
}
