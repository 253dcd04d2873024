//! Run-control endpoints for single-graph executions: start, SSE stream,
//! cancel.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};

use crate::api::error::ApiResult;
use crate::api::models::{ExecuteGraphRequest, MessageResponse, StartExecutionResponse};
use crate::api::routes::AppState;

/// POST /api/executions
pub async fn start_execution(
    State(state): State<AppState>,
    Json(req): Json<ExecuteGraphRequest>,
) -> ApiResult<Json<StartExecutionResponse>> {
    let execution_id = state
        .executions
        .start_execution(&req.graph_id, req.output_node_ids, req.force)
        .await?;
    Ok(Json(StartExecutionResponse {
        stream_url: format!("/api/executions/{execution_id}/stream"),
        execution_id,
    }))
}

/// GET /api/executions/:execution_id/stream
///
/// Server-sent events, one `data: <json>` frame per execution event. The
/// stream ends when the run reaches its terminal event.
pub async fn stream_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let events = state.executions.stream_execution(&execution_id)?;
    let frames = events.map(|event| Event::default().json_data(&event));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// DELETE /api/executions/:execution_id
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.executions.cancel_execution(&execution_id)?;
    Ok(Json(MessageResponse::new("Execution cancelled")))
}
