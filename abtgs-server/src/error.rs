//! Error types for abtgs-server
//!
//! Handlers return [`ApiResult`]; every domain error converts into the HTTP
//! error it corresponds to.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::adapters::StageError;
use crate::models::TransitionError;
use crate::services::{ExportError, RateLimited, ResolverError, SchedulerError, ValidationError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict with the job's current state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client exceeded its submission allowance (429)
    #[error("Rate limited: {0}")]
    TooManyRequests(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Common error: {0}")]
    Common(#[from] abtgs_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", err.to_string()),
            ApiError::Common(ref err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", err.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<RateLimited> for ApiError {
    fn from(err: RateLimited) -> Self {
        ApiError::TooManyRequests(err.to_string())
    }
}

impl From<ResolverError> for ApiError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::UnknownTag(_) => ApiError::NotFound(err.to_string()),
            ResolverError::UnknownCandidate(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::AlreadyTerminal { .. } => ApiError::Conflict(err.to_string()),
            SchedulerError::ShuttingDown => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Conflict(err.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::NotReady(_) => ApiError::Conflict(err.to_string()),
            ExportError::NothingToExport => ApiError::BadRequest(err.to_string()),
            ExportError::Stage(_) | ExportError::Archive(_) | ExportError::Io(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StageError::UnsupportedFormat(_) | StageError::FileTooLarge { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (ApiError::from(ResolverError::UnknownTag("9".into())), StatusCode::NOT_FOUND),
            (
                ApiError::from(ResolverError::UnknownCandidate("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::from(ValidationError::UnsupportedScheme), StatusCode::BAD_REQUEST),
            (
                ApiError::from(SchedulerError::NotFound(Uuid::nil())),
                StatusCode::NOT_FOUND,
            ),
            (ApiError::from(ExportError::NothingToExport), StatusCode::BAD_REQUEST),
            (
                ApiError::from(RateLimited {
                    client: std::net::Ipv4Addr::LOCALHOST.into(),
                    per_minute: 5,
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
