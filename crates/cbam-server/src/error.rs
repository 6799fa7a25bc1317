//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the unified error type for all API endpoints. It implements
//! `axum::response::IntoResponse` to produce structured JSON error responses
//! with appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use cbam_core::CoreError;
use cbam_storage::StorageError;

use crate::concurrency::{LockError, RunDenial};

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "BAD_REQUEST").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details (e.g., the run holding a lock).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API errors with HTTP status code mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Entity not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request: self-loop, wrong endpoint kinds, bad quantity (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error (500).
    #[error("internal error: {0}")]
    InternalError(String),

    /// Another propagation run holds the graph lock (409). Retry later.
    #[error("concurrent modification: graph '{}' is locked by run {}", .0.graph, .0.holder_run_id)]
    ConcurrentModification(RunDenial),
}

impl ApiError {
    fn status_and_detail(&self) -> (StatusCode, ApiErrorDetail) {
        let simple = |status: StatusCode, code: &str, msg: &str| {
            (
                status,
                ApiErrorDetail {
                    code: code.to_string(),
                    message: msg.to_string(),
                    details: None,
                },
            )
        };
        match self {
            ApiError::NotFound(msg) => simple(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => simple(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::InternalError(msg) => {
                simple(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
            ApiError::ConcurrentModification(denial) => (
                StatusCode::CONFLICT,
                ApiErrorDetail {
                    code: "CONCURRENT_MODIFICATION".to_string(),
                    message: self.to_string(),
                    details: serde_json::to_value(denial).ok(),
                },
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": detail,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::NodeNotFound { .. } | CoreError::EmissionMissing { .. } => {
                ApiError::NotFound(err.to_string())
            }
            CoreError::SelfLoop { .. }
            | CoreError::InvalidEdge { .. }
            | CoreError::InvalidEdgeKind { .. }
            | CoreError::InvalidNodeKind { .. }
            | CoreError::InvalidQuantity { .. } => ApiError::BadRequest(err.to_string()),
            CoreError::Overflow { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Core(core) => ApiError::from(core),
            StorageError::EdgeNotFound(_)
            | StorageError::ProcessNotFound(_)
            | StorageError::ProductNotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::ConcurrentModification(denial) => ApiError::ConcurrentModification(denial),
            LockError::NotHeld { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbam_core::id::{EdgeId, ProcessId};
    use cbam_core::node::NodeRef;

    #[test]
    fn status_mapping() {
        let self_loop: ApiError = CoreError::SelfLoop {
            node: NodeRef::process(ProcessId(1)),
        }
        .into();
        assert_eq!(self_loop.status_and_detail().0, StatusCode::BAD_REQUEST);

        let wrapped: ApiError = StorageError::Core(CoreError::InvalidEdgeKind {
            value: "flows".into(),
        })
        .into();
        assert_eq!(wrapped.status_and_detail().0, StatusCode::BAD_REQUEST);

        let missing: ApiError = StorageError::EdgeNotFound(EdgeId(4)).into();
        let (status, detail) = missing.status_and_detail();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(detail.code, "NOT_FOUND");
    }

    #[test]
    fn lock_denial_is_conflict_with_details() {
        let denial = RunDenial {
            graph: "default".into(),
            holder_run_id: crate::concurrency::RunId::new(),
            holder_operation: "recompute_graph".into(),
            held_since: chrono::Utc::now(),
        };
        let err: ApiError = LockError::ConcurrentModification(denial).into();
        let (status, detail) = err.status_and_detail();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(detail.code, "CONCURRENT_MODIFICATION");
        assert_eq!(detail.details.unwrap()["holder_operation"], "recompute_graph");
    }
}
