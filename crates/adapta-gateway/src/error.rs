use adapta_core::AdaptaError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

/// Error returned by a handler, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request body.
    #[error("{0}")]
    BadRequest(String),

    /// Failure from the execution core.
    #[error(transparent)]
    Core(#[from] AdaptaError),
}

impl ApiError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(e) => match e {
                AdaptaError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                AdaptaError::InvalidTransition { .. } => StatusCode::CONFLICT,
                AdaptaError::StreamingUnsupported(_) => StatusCode::BAD_REQUEST,
                AdaptaError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = %status, error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}
