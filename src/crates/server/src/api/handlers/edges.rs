//! Edge endpoints. Compatibility, duplicate, and cycle validation happen
//! inside `Graph::add_edge`; this layer only translates errors to HTTP.

use axum::extract::{Path, State};
use axum::Json;

use mediagraph_core::graph::Edge;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::CreateEdgeRequest;
use crate::api::routes::AppState;

/// POST /api/graphs/:graph_id/edges
pub async fn create_edge(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Json(req): Json<CreateEdgeRequest>,
) -> ApiResult<Json<Edge>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;

    let edge = Edge::from_ports(
        req.from_node_id,
        req.from_port_id,
        req.to_node_id,
        req.to_port_id,
    );
    graph.add_edge(edge.clone())?;
    state.repo.save(&graph).await?;
    Ok(Json(edge))
}

/// DELETE /api/graphs/:graph_id/edges/:edge_id
pub async fn delete_edge(
    State(state): State<AppState>,
    Path((graph_id, edge_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut graph = state
        .repo
        .load(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))?;

    graph.remove_edge(&edge_id);
    state.repo.save(&graph).await?;
    Ok(Json(serde_json::json!({"message": "Edge deleted"})))
}
