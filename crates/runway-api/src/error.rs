//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<runway_core::Error> for ApiError {
    fn from(err: runway_core::Error) -> Self {
        match err {
            runway_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            runway_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            runway_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<runway_db::DbError> for ApiError {
    fn from(err: runway_db::DbError) -> Self {
        match err {
            runway_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            runway_db::DbError::InvalidRange(msg) => ApiError::BadRequest(msg),
            runway_db::DbError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
