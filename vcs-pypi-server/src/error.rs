//! # Error Handling and Response Types
//!
//! Two layers of errors flow through the index:
//!
//! - [`ProviderError`]: failures talking to the VCS hosting provider. These are
//!   `Clone` because a single in-flight snapshot load is shared by every request
//!   waiting on it.
//! - [`AppError`]: everything a request handler can fail with. It implements
//!   [`IntoResponse`] and maps each failure onto an HTTP status code.
//!
//! | Error                          | Status                      |
//! |--------------------------------|-----------------------------|
//! | `ProviderError::Unavailable`   | 502 Bad Gateway             |
//! | `ProviderError::RateLimited`   | 503 + `Retry-After`         |
//! | `ProviderError::Auth`          | 500 Internal Server Error   |
//! | `AppError::ProjectNotFound`    | 404 Not Found               |
//! | `AppError::Unauthorized`       | 401 + `WWW-Authenticate`    |
//!
//! Error bodies are small JSON documents; an HTML page is only ever returned
//! once it has been rendered completely.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;

/// Realm advertised to clients when inbound authentication is required.
pub const AUTH_REALM: &str = "Basic realm='Simple index'";

/// Failures reported by a [`VcsProvider`](crate::provider::VcsProvider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout or 5xx answer. Retryable.
    #[error("VCS provider unavailable: {0}")]
    Unavailable(String),

    /// The configured token was rejected. Fatal until reconfigured.
    #[error("VCS provider rejected credentials: {0}")]
    Auth(String),

    /// The provider signalled rate-limit exhaustion.
    #[error("VCS provider rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The provider answered with something outside the consumed schema.
    #[error("unexpected VCS provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid VCS provider configuration: {0}")]
    Misconfigured(String),
}

impl ProviderError {
    /// Whether a later attempt can succeed without reconfiguration.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::RateLimited { .. }
        )
    }
}

/// Convenient result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Standardized error response structure
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,     // Human-readable error message
    pub code: String,      // Machine-readable error code
    pub timestamp: String, // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    AuthError,
    UpstreamUnavailable,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::AuthError => "auth_error",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AuthError => StatusCode::UNAUTHORIZED,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template rendering error: {0}")]
    Template(#[from] askama::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::ProjectNotFound(_) => ErrorCode::NotFound,
            AppError::Unauthorized(_) => ErrorCode::AuthError,
            AppError::Provider(ProviderError::Unavailable(_)) => ErrorCode::UpstreamUnavailable,
            AppError::Provider(ProviderError::RateLimited { .. }) => ErrorCode::RateLimited,
            AppError::Provider(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Template(_)
            | AppError::Config(_)
            | AppError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            error: self.to_string(),
            code: self.error_code().as_str().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.http_status();

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let mut response = (status, axum::Json(self.to_error_response())).into_response();

        match &self {
            AppError::Provider(ProviderError::RateLimited { retry_after }) => {
                let seconds = retry_after.as_secs().max(1).to_string();
                if let Ok(value) = HeaderValue::from_str(&seconds) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            AppError::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(AUTH_REALM),
                );
            }
            _ => {}
        }

        response
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;
