//! Structured API error responses with error codes
//!
//! Every failing endpoint answers with the same envelope:
//! `{"error": {"code", "numeric_code", "message", "details"?}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::query::QueryError;
use crate::auth::AuthError;
use crate::infra::{IngestError, StoreError};

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (1xxx)
    /// Missing or unknown credentials
    Unauthorized,

    // Validation (3xxx)
    /// Query parameter failed validation
    ValidationError,
    /// Inbound result message could not be decoded
    InvalidMessage,

    // Resource (4xxx)
    /// No receipt stored under the requested id
    ReceiptNotFound,

    // Infrastructure (8xxx)
    /// Store answered with an error
    StoreError,
    /// Store is closed or unreachable
    StoreUnavailable,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::Unauthorized => 1001,
            ErrorCode::ValidationError => 3001,
            ErrorCode::InvalidMessage => 3002,
            ErrorCode::ReceiptNotFound => 4001,
            ErrorCode::StoreError => 8001,
            ErrorCode::StoreUnavailable => 8002,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::ValidationError | ErrorCode::InvalidMessage => StatusCode::BAD_REQUEST,
            ErrorCode::ReceiptNotFound => StatusCode::NOT_FOUND,
            ErrorCode::StoreError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::ReceiptNotFound => "RECEIPT_NOT_FOUND",
            ErrorCode::StoreError => "STORE_ERROR",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.as_str();
        let mut response = (status, Json(self)).into_response();

        // Error code header for log correlation
        response.headers_mut().insert(
            axum::http::header::HeaderName::from_static("x-error-code"),
            axum::http::HeaderValue::from_static(code_str),
        );

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => ApiError::new(ErrorCode::StoreUnavailable, err.to_string()),
            StoreError::Corrupt { ref id, .. } => {
                let id = id.clone();
                ApiError::new(ErrorCode::StoreError, err.to_string()).with_resource_id(id)
            }
            other => ApiError::new(ErrorCode::StoreError, other.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Store(e) => e.into(),
            QueryError::InvalidId(ref id) => {
                let id = id.clone();
                validation_error("id", err.to_string()).with_resource_id(id)
            }
            QueryError::LimitExceeded { limit, max } => ApiError::new(
                ErrorCode::ValidationError,
                err.to_string(),
            )
            .with_details(serde_json::json!({
                "field": "limit",
                "limit": limit,
                "max": max
            })),
            QueryError::BadLimit(_) => validation_error("limit", err.to_string()),
            QueryError::BadSkip(_) => validation_error("skip", err.to_string()),
            QueryError::BadSince(_) => validation_error("since", err.to_string()),
            QueryError::BadCursor(_) => validation_error("start", err.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::new(ErrorCode::InvalidMessage, err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new(ErrorCode::Unauthorized, err.to_string())
    }
}

/// 404 for a receipt id
pub fn receipt_not_found(id: &str) -> ApiError {
    ApiError::new(
        ErrorCode::ReceiptNotFound,
        format!("receipt not found: {}", id),
    )
    .with_resource_id(id)
}

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::ValidationError, message.into()).with_details(serde_json::json!({
        "field": field
    }))
}
