//! Error types for annomirror-web

use annomirror_sync::{SyncAborted, SyncSummary};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Sync stopped because the remote went away (502)
    #[error("{0}")]
    SyncAborted(#[from] SyncAborted),

    /// annomirror-common error
    #[error("Common error: {0}")]
    Common(#[from] annomirror_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut summary: Option<SyncSummary> = None;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::SyncAborted(aborted) => {
                summary = Some(aborted.summary);
                (
                    StatusCode::BAD_GATEWAY,
                    "REMOTE_UNAVAILABLE",
                    aborted.to_string(),
                )
            }
            ApiError::Common(annomirror_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(annomirror_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => {
                error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_UNAVAILABLE",
                    "the mirror store is unavailable".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });
        if let Some(summary) = summary {
            body["summary"] = json!(summary);
        }

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
