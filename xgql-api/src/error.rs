//! Error Types for the xgql API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Failures inside a GraphQL execution never become an ApiError; they are
//! field errors (see `graph::context`). ApiError covers what happens before
//! execution starts, such as malformed credential headers, and startup.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use xgql_core::{ConfigError, StoreError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Credential headers are malformed
    InvalidCredentials,

    /// Configuration is missing or invalid
    InvalidConfiguration,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidCredentials => StatusCode::BAD_REQUEST,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidConfiguration | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for non-GraphQL failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Create an InvalidCredentials error naming the offending header.
    pub fn invalid_credentials(header: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidCredentials,
            format!("Invalid {} header: {}", header, reason),
        )
        .with_details(serde_json::json!({ "header": header }))
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new(ErrorCode::InvalidConfiguration, err.to_string())
    }
}

/// Store failures only surface as ApiError during startup (discovery).
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Object store error");
        match err {
            StoreError::Invalid { reason } => ApiError::new(ErrorCode::InvalidConfiguration, reason),
            other => ApiError::service_unavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal_error(format!("I/O error: {}", err))
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(
            ErrorCode::InvalidCredentials.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::InvalidConfiguration.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_credentials_names_header() {
        let err = ApiError::invalid_credentials("Impersonate-Group", "requires Impersonate-User");
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
        assert!(err.message.contains("Impersonate-Group"));
        assert_eq!(
            err.details,
            Some(serde_json::json!({"header": "Impersonate-Group"}))
        );
    }

    #[test]
    fn test_error_serialization() {
        let err = ApiError::service_unavailable("discovery failed");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["message"], "discovery failed");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_conversions() {
        let err: ApiError = ConfigError::MissingRequired {
            field: "XGQL_API_SERVER".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        let err: ApiError = StoreError::Transport {
            reason: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_into_response_status() {
        let response = ApiError::invalid_credentials("Authorization", "empty token").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
