//! Router assembly and shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use mediagraph_core::runs::{BatchManager, ExecutionManager};
use mediagraph_core::traits::{GraphRepository, MediaStore};

use crate::api::handlers::{batches, edges, executions, graphs, nodes};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn GraphRepository>,
    pub store: Arc<dyn MediaStore>,
    pub executions: Arc<ExecutionManager>,
    pub batches: Arc<BatchManager>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the complete API router. `media_dir` is served statically under
/// `/media` so result urls resolve directly.
pub fn create_router(state: AppState, media_dir: PathBuf) -> Router {
    Router::new()
        .route("/health", get(health))
        // Graphs
        .route(
            "/api/graphs",
            post(graphs::create_graph).get(graphs::list_graphs),
        )
        .route(
            "/api/graphs/:graph_id",
            get(graphs::get_graph)
                .patch(graphs::update_graph)
                .delete(graphs::delete_graph),
        )
        .route("/api/graphs/:graph_id/duplicate", post(graphs::duplicate_graph))
        // Nodes
        .route("/api/graphs/:graph_id/nodes", post(nodes::create_node))
        .route(
            "/api/graphs/:graph_id/nodes/:node_id",
            axum::routing::patch(nodes::update_node).delete(nodes::delete_node),
        )
        .route(
            "/api/graphs/:graph_id/nodes/:node_id/regenerate",
            post(nodes::regenerate_node),
        )
        // Edges
        .route("/api/graphs/:graph_id/edges", post(edges::create_edge))
        .route(
            "/api/graphs/:graph_id/edges/:edge_id",
            delete(edges::delete_edge),
        )
        // Executions
        .route("/api/executions", post(executions::start_execution))
        .route(
            "/api/executions/:execution_id/stream",
            get(executions::stream_execution),
        )
        .route(
            "/api/executions/:execution_id",
            delete(executions::cancel_execution),
        )
        // Batch executions
        .route("/api/batch-executions", post(batches::start_batch))
        .route(
            "/api/batch-executions/:batch_id/stream",
            get(batches::stream_batch),
        )
        .route(
            "/api/batch-executions/:batch_id",
            delete(batches::cancel_batch),
        )
        // Stored media artifacts
        .nest_service("/media", ServeDir::new(media_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
