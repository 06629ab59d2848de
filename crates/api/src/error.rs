use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use easel_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce the `{"ok":false,"error":...}`
/// envelope every client route answers errors with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A domain-level error from `easel_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No provider can take work right now.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The task resolved as failed or aborted while a client was waiting.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// A long-poll gave up before the task resolved.
    #[error("Timed out waiting for the task result")]
    ResultTimeout,

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // --- CoreError variants ---
            ApiError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
                CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::TaskFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ApiError::ResultTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timed out waiting for the task result".to_string(),
            ),
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "ok": false,
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
