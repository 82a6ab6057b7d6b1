use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use parley_db::error::StoreError;

/// HTTP-facing error type. Every storage error kind maps onto a distinct
/// status; internals are logged server-side and never leaked in the body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Forbidden => ApiError::Forbidden(
                "conversation does not exist or you are not a member".into(),
            ),
            StoreError::Conflict(msg) => ApiError::Conflict(msg.into()),
            StoreError::Busy | StoreError::Internal(_) => {
                tracing::error!("storage failure: {e}");
                ApiError::Internal("storage failure".into())
            }
        }
    }
}

impl ApiError {
    /// For `spawn_blocking` handles whose task panicked or was cancelled.
    pub fn join(e: tokio::task::JoinError) -> Self {
        tracing::error!("spawn_blocking join error: {e}");
        ApiError::Internal("task join error".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: StoreError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn storage_errors_map_to_distinct_statuses() {
        assert_eq!(
            status_of(StoreError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(StoreError::NotFound("user")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(StoreError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(StoreError::Conflict("dup")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StoreError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(StoreError::Busy), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
