/// Unified error types for the Courier backend
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the backend
#[derive(Error, Debug)]
pub enum CourierError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., phone already owned, username taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Push gateway errors. Never surfaced from the message send path;
    /// downgraded to a recorded relay failure there.
    #[error("Push relay error: {0}")]
    Push(String),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert CourierError to HTTP response
impl IntoResponse for CourierError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            CourierError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            CourierError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "Forbidden", self.to_string())
            }
            CourierError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string())
            }
            CourierError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            CourierError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            CourierError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "InvalidToken",
                self.to_string(),
            ),
            CourierError::Database(_)
            | CourierError::Push(_)
            | CourierError::Internal(_)
            | CourierError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for backend operations
pub type CourierResult<T> = Result<T, CourierError>;
