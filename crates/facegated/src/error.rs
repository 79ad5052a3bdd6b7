use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;
use crate::store::StoreError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce the `{"detail": ...}` envelope the
/// browser client surfaces in its enrollment modal. Application outcomes such
/// as "no face detected" are not errors; they travel as `success=false`
/// payloads with status 200.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A bad request with a human-readable message.
    #[error("{0}")]
    BadRequest(String),

    /// Inference pipeline failure.
    #[error("face pipeline error: {0}")]
    Engine(#[from] EngineError),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Engine(err) => {
                tracing::error!(error = %err, "inference pipeline error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Face processing failed".to_string(),
                )
            }
            ApiError::Store(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage failure".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "detail": detail }))).into_response()
    }
}
