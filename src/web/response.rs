//! JSON response envelope and error mapping.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::db::DbError;
use crate::monitor::LifecycleError;

/// `{success, message}` body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// `{success, result}` body.
#[derive(Debug, Serialize)]
pub struct ResultResponse<T> {
    pub success: bool,
    pub result: T,
}

impl<T: Serialize> ResultResponse<T> {
    pub fn ok(result: T) -> Self {
        Self { success: true, result }
    }
}

/// Errors returned to API callers.
#[derive(Debug)]
pub enum ApiError {
    /// The request body could not be decoded.
    BadRequest(String),
    Validation(String),
    NotFound(String),
    /// Logged in full, reported to the caller generically.
    Internal(String),
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(msg) => ApiError::Validation(msg),
            LifecycleError::NotFound(what) => ApiError::NotFound(what),
            LifecycleError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("request task failed: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, format!("validation failure [{}]", msg)),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)),
            ApiError::Internal(detail) => {
                tracing::error!("Request failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Unable to process request".to_string())
            }
        };

        json_or_fallback(status, &MessageResponse::failure(message))
    }
}

/// Encode `body` as JSON, degrading to a plain-text message if encoding fails.
pub fn json_or_fallback<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => {
            tracing::error!("Could not encode error: {}", e);
            (status, "Could not encode error").into_response()
        }
    }
}
