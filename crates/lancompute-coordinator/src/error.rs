//! Maps [`lancompute_core::CoreError`] onto HTTP responses.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, response::Response};
use lancompute_core::CoreError;

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::DuplicateTaskId(_) => StatusCode::CONFLICT,
            CoreError::UnknownTask(_) | CoreError::UnknownNode(_) => StatusCode::NOT_FOUND,
            CoreError::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
            CoreError::CapacityExceeded(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
