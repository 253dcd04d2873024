//! Run-control endpoints for batch executions.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};

use crate::api::error::ApiResult;
use crate::api::models::{BatchExecuteRequest, MessageResponse, StartBatchResponse};
use crate::api::routes::AppState;

/// POST /api/batch-executions
pub async fn start_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchExecuteRequest>,
) -> ApiResult<Json<StartBatchResponse>> {
    let batch_id = state
        .batches
        .start_batch(&req.experiment_id, req.graph_ids, req.force)
        .await?;
    Ok(Json(StartBatchResponse {
        stream_url: format!("/api/batch-executions/{batch_id}/stream"),
        batch_id,
    }))
}

/// GET /api/batch-executions/:batch_id/stream
pub async fn stream_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let events = state.batches.stream_batch(&batch_id)?;
    let frames = events.map(|event| Event::default().json_data(&event));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// DELETE /api/batch-executions/:batch_id
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.batches.cancel_batch(&batch_id)?;
    Ok(Json(MessageResponse::new("Batch execution cancelled")))
}
