//! Error types for the gateway layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// A field-level validation descriptor surfaced to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Gateway error types.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatewayError::Validation(fields) => json!({
                "error": status.as_str(),
                "message": self.to_string(),
                "fields": fields,
            }),
            GatewayError::Internal(detail) => {
                // Storage failures reach the caller as a generic server
                // error; the detail stays in the log.
                error!(%detail, "internal gateway error");
                json!({
                    "error": status.as_str(),
                    "message": self.to_string(),
                })
            }
            other => json!({
                "error": status.as_str(),
                "message": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<murmur_auth::AuthError> for GatewayError {
    fn from(error: murmur_auth::AuthError) -> Self {
        use murmur_auth::AuthError;

        match error {
            AuthError::UsernameTaken => GatewayError::Conflict("username is already taken".to_string()),
            // Unknown identity and bad secret deliberately collapse into
            // one caller-facing message.
            AuthError::InvalidCredentials => {
                GatewayError::AuthenticationFailed("invalid credentials".to_string())
            }
            AuthError::SessionNotFound | AuthError::Unauthenticated => {
                GatewayError::AuthenticationFailed("no active session".to_string())
            }
            AuthError::PasswordHash(e) => GatewayError::Internal(e.to_string()),
            AuthError::SessionStore(message) | AuthError::Database(message) => {
                GatewayError::Internal(message)
            }
        }
    }
}
