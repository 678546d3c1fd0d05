//! Response envelope and the API error taxonomy.
//!
//! Every JSON response carries `success`. Errors add a human-readable
//! `error` and a stable `code`; internal causes are logged, never sent.

use crate::error::{AuthError, StorageError};
use crate::limits::RateLimitError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Message returned for any rejected credential.
pub const INVALID_CREDENTIALS: &str = "Invalid or expired token";

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always `true`.
    pub success: bool,
    /// Endpoint payload.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap `data` in a success envelope.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    code: &'static str,
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, unknown, expired or revoked credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Rejected by a rate limiter.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Resource already exists.
    #[error("{0}")]
    Conflict(String),

    /// Resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Infrastructure failure; details are in the logs.
    #[error("An internal error occurred")]
    Internal,
}

impl ApiError {
    /// Shorthand for an unauthenticated outcome.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    /// HTTP status and stable error code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            Self::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();
        let body = ErrorBody {
            success: false,
            error: &message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated { reason } => {
                tracing::debug!(reason, "Credential rejected");
                Self::unauthenticated(INVALID_CREDENTIALS)
            }
            AuthError::Timeout(deadline) => {
                tracing::error!("Token store timed out after {:?}", deadline);
                Self::Internal
            }
            other => {
                tracing::error!("Token operation failed: {}", other);
                Self::Internal
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { entity } => Self::Conflict(format!("{} already exists", entity)),
            other => {
                tracing::error!("Storage operation failed: {}", other);
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
