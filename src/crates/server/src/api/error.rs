//! API error types and HTTP response conversion.
//!
//! Graph-structural errors surface as 400s, missing resources as 404s, and
//! everything else as 500s. Per-node runtime failures never reach this
//! layer — they travel through the event stream instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use mediagraph_core::error::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
    message: String,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::GraphNotFound(_)
            | EngineError::NodeNotFound(_)
            | EngineError::RunNotFound(_) => Self::NotFound(err.to_string()),
            EngineError::PortNotFound(_)
            | EngineError::PortIncompatible { .. }
            | EngineError::CycleDetected
            | EngineError::DuplicateEdge(_)
            | EngineError::InvariantViolation(_) => Self::BadRequest(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let body = ApiErrorBody {
            error: error.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
