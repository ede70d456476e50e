use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Invalid invalidation pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Client {0} may not use admin routes")]
    Forbidden(String),
}

pub type GuardResult<T> = Result<T, GuardError>;

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Configuration(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_guard_error(err: &GuardError) -> Self {
        let message = err.to_string();
        match err {
            GuardError::InvalidPattern(_) => Self::new("bad_request", &message, 400),
            GuardError::Validation(_) => Self::new("validation_error", &message, 422),
            GuardError::UnknownNamespace(_) | GuardError::NotFound(_) => {
                Self::new("not_found", &message, 404)
            }
            GuardError::Forbidden(_) => Self::new("forbidden", &message, 403),
            GuardError::Configuration(_) => Self::new("configuration_error", &message, 500),
            GuardError::Io(_) => Self::new("internal_error", &message, 500),
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_guard_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
