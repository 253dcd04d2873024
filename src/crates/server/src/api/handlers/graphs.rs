//! Graph CRUD and duplication endpoints.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use mediagraph_core::graph::{Edge, Graph};
use mediagraph_core::media::MediaUrls;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{CreateGraphRequest, UpdateGraphRequest};
use crate::api::routes::AppState;

async fn load_graph(state: &AppState, graph_id: &str) -> ApiResult<Graph> {
    state
        .repo
        .load(graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph not found: {graph_id}")))
}

/// POST /api/graphs
pub async fn create_graph(
    State(state): State<AppState>,
    Json(req): Json<CreateGraphRequest>,
) -> ApiResult<Json<Graph>> {
    let graph = Graph::new(Uuid::new_v4().to_string(), req.name);
    state.repo.save(&graph).await?;
    tracing::info!(graph_id = %graph.id, "created graph");
    Ok(Json(graph))
}

/// GET /api/graphs
pub async fn list_graphs(State(state): State<AppState>) -> ApiResult<Json<Vec<Graph>>> {
    Ok(Json(state.repo.list_all().await?))
}

/// GET /api/graphs/:graph_id
pub async fn get_graph(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
) -> ApiResult<Json<Graph>> {
    Ok(Json(load_graph(&state, &graph_id).await?))
}

/// PATCH /api/graphs/:graph_id
pub async fn update_graph(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Json(req): Json<UpdateGraphRequest>,
) -> ApiResult<Json<Graph>> {
    let mut graph = load_graph(&state, &graph_id).await?;
    if let Some(name) = req.name {
        graph.name = name;
    }
    if let Some(canvas_memory) = req.canvas_memory {
        graph.canvas_memory = canvas_memory;
    }
    state.repo.save(&graph).await?;
    Ok(Json(graph))
}

/// DELETE /api/graphs/:graph_id
pub async fn delete_graph(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let graph = load_graph(&state, &graph_id).await?;
    for node in graph.nodes() {
        state.store.delete_node_media(&node.id).await?;
    }
    state.repo.delete(&graph_id).await?;
    tracing::info!(graph_id = %graph_id, "deleted graph");
    Ok(Json(serde_json::json!({"message": "Graph deleted"})))
}

fn remap_urls(urls: &MediaUrls, old_id: &str, new_id: &str) -> MediaUrls {
    let old_prefix = format!("/media/{old_id}/");
    let new_prefix = format!("/media/{new_id}/");
    let remap = |url: &str| {
        if url.starts_with("/media/") {
            url.replacen(&old_prefix, &new_prefix, 1)
        } else {
            url.to_string()
        }
    };
    MediaUrls::new(remap(&urls.original), remap(&urls.thumbnail))
}

/// POST /api/graphs/:graph_id/duplicate
///
/// Deep copy: new graph/node/edge ids, port ids and media urls remapped,
/// blob files copied, node statuses and staleness preserved.
pub async fn duplicate_graph(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
) -> ApiResult<Json<Graph>> {
    let source = load_graph(&state, &graph_id).await?;

    let node_id_map: std::collections::HashMap<String, String> = source
        .nodes()
        .map(|n| (n.id.clone(), Uuid::new_v4().to_string()))
        .collect();

    let mut copy = Graph::new(Uuid::new_v4().to_string(), format!("{} (Copy)", source.name));
    copy.canvas_memory = source.canvas_memory.clone();

    for node in source.nodes() {
        let new_id = &node_id_map[&node.id];
        let mut new_node = node.clone();
        new_node.id = new_id.clone();
        // Port ids embed the node id.
        for port in new_node
            .input_ports
            .iter_mut()
            .chain(new_node.output_ports.iter_mut())
        {
            port.id = port.id.replacen(&node.id, new_id, 1);
        }
        if let Some(result) = &mut new_node.result {
            result.urls = remap_urls(&result.urls, &node.id, new_id);
        }
        for result in &mut new_node.generation_history {
            result.urls = remap_urls(&result.urls, &node.id, new_id);
        }
        state.store.duplicate_node_media(&node.id, new_id).await?;
        copy.add_node(new_node);
    }

    for edge in source.edges() {
        let conn = &edge.connection;
        let new_from = &node_id_map[&conn.from_node_id];
        let new_to = &node_id_map[&conn.to_node_id];
        copy.add_edge(Edge::from_ports(
            new_from.clone(),
            conn.from_port_id.replacen(&conn.from_node_id, new_from, 1),
            new_to.clone(),
            conn.to_port_id.replacen(&conn.to_node_id, new_to, 1),
        ))?;
    }

    // add_edge taints its targets; the copy should carry the source's
    // staleness verbatim.
    for (old_id, new_id) in &node_id_map {
        let stale = source.get_node(old_id).map(|n| n.stale).unwrap_or(false);
        if let Some(node) = copy.get_node_mut(new_id) {
            node.stale = stale;
        }
    }

    state.repo.save(&copy).await?;
    tracing::info!(source = %graph_id, copy = %copy.id, "duplicated graph");
    Ok(Json(copy))
}
