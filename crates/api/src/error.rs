//! Error handling for API endpoints

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notifier_core::DispatcherError;
use serde::Serialize;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// API error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", Some(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad Request", Some(msg)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg)),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<DispatcherError> for ApiError {
    fn from(err: DispatcherError) -> Self {
        match err {
            DispatcherError::NotificationNotFound(id) => {
                ApiError::NotFound(format!("notification not found: {id}"))
            }
            DispatcherError::OutboxMessageNotFound(id) => {
                ApiError::NotFound(format!("outbox message not found: {id}"))
            }
            DispatcherError::InvalidTitle(msg) => ApiError::BadRequest(msg),
            DispatcherError::EmptyMethods => {
                ApiError::BadRequest("methods list must not be empty".to_string())
            }
            DispatcherError::Database(e) => e.into(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    ApiError::Conflict(format!("constraint violation: {constraint}"))
                } else {
                    ApiError::Internal(format!("database error: {db_err}"))
                }
            }
            _ => ApiError::Internal(format!("database error: {err}")),
        }
    }
}
