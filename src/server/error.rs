//! HTTP error responses.

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::tasks::TaskError;

/// Error returned by handlers. Renders as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status = match &err {
            TaskError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::CapacityExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Storage(_) | TaskError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "Request failed: {}", self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Panic boundary for `CatchPanicLayer`: log and answer 500.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!("Request handler panicked: {}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "detail": "Internal server error",
            "error": message,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskId;

    #[test]
    fn test_task_error_status_mapping() {
        let cases = [
            (TaskError::InvalidInput("empty".into()), StatusCode::BAD_REQUEST),
            (TaskError::NotFound(TaskId::new()), StatusCode::NOT_FOUND),
            (
                TaskError::CapacityExhausted { capacity: 1 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TaskError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
