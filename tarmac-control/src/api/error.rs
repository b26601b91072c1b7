//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::service::error::ControlError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    /// The target is busy with the running event `event_id`
    Locked { message: String, event_id: Uuid },
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, event_id) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Locked { message, event_id } => (StatusCode::CONFLICT, message, Some(event_id)),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = match event_id {
            Some(id) => serde_json::json!({ "error": message, "event_id": id }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Locked { event_id, .. } => ApiError::Locked {
                message: err.to_string(),
                event_id,
            },
            ControlError::PermissionDenied => ApiError::Forbidden(err.to_string()),
            ControlError::Validation(msg) => ApiError::BadRequest(msg),
            ControlError::InvalidVersion(_) => ApiError::BadRequest(err.to_string()),
            ControlError::NotFound(msg) => ApiError::NotFound(msg),
            ControlError::Conflict(msg) => ApiError::Conflict(msg),
            ControlError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            ControlError::Backend(ref store) => {
                tracing::error!("Store error: {:?}", store);
                ApiError::InternalError("Internal server error".to_string())
            }
            ControlError::AlreadyClosed(_) | ControlError::Provision(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
