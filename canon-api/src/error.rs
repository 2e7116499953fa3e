//! HTTP error responses.
//!
//! Every failure leaves the service as `{ "code", "message", "details" }`
//! JSON. Domain errors are translated here so that a conflict is always a
//! 409 and an expired cursor is always a 410 pointing at the snapshot route.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use canon_core::{CanonError, FeedError, RegistryError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Stable, machine-readable failure category. Each code has exactly one
/// HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    /// No active mapping for the external identifier
    MappingNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Entity was modified since the caller read it
    VersionConflict,

    /// External identifier is bound to a different live entity
    MappingConflict,

    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Gone (410)
    // ========================================================================
    /// Cursor predates the change feed's retention horizon
    CursorExpired,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Authoritative store is unreachable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::InvalidFormat => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::EntityNotFound | ErrorCode::MappingNotFound => StatusCode::NOT_FOUND,

            ErrorCode::VersionConflict | ErrorCode::MappingConflict | ErrorCode::StateConflict => {
                StatusCode::CONFLICT
            }

            ErrorCode::CursorExpired => StatusCode::GONE,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::MappingNotFound => "Mapping not found",
            ErrorCode::VersionConflict => "Entity was modified by another request",
            ErrorCode::MappingConflict => "External identifier is bound to another entity",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::CursorExpired => "Cursor expired, re-snapshot required",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
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

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    pub code: ErrorCode,

    pub message: String,

    /// Optional machine-readable context (current version, horizon, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
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

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
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

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn entity_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::EntityNotFound, format!("Entity {} not found", id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
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
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<CanonError> for ApiError {
    fn from(err: CanonError) -> Self {
        let message = err.to_string();
        match err {
            CanonError::Storage(StorageError::NotFound { id }) => {
                ApiError::new(ErrorCode::EntityNotFound, message)
                    .with_details(serde_json::json!({ "entity_id": id }))
            }
            CanonError::Storage(StorageError::VersionConflict {
                id,
                expected,
                actual,
            }) => ApiError::new(ErrorCode::VersionConflict, message).with_details(
                serde_json::json!({
                    "entity_id": id,
                    "expected_version": expected,
                    "current_version": actual,
                }),
            ),
            CanonError::Storage(StorageError::Tombstoned { id }) => {
                ApiError::new(ErrorCode::StateConflict, message)
                    .with_details(serde_json::json!({ "entity_id": id }))
            }
            CanonError::Storage(StorageError::Unavailable { .. }) => {
                tracing::warn!(error = %message, "Authoritative store unavailable");
                ApiError::new(ErrorCode::ServiceUnavailable, message)
            }
            CanonError::Storage(StorageError::LockPoisoned | StorageError::Backend { .. }) => {
                // Log the full error, return a generic message.
                tracing::error!(error = %message, "Storage failure");
                ApiError::from_code(ErrorCode::InternalError)
            }
            CanonError::Registry(RegistryError::MappingNotFound { external }) => {
                ApiError::new(ErrorCode::MappingNotFound, message).with_details(
                    serde_json::json!({
                        "namespace": external.namespace,
                        "external_id": external.external_id,
                    }),
                )
            }
            CanonError::Registry(RegistryError::Conflict {
                external,
                existing,
                requested,
            }) => ApiError::new(ErrorCode::MappingConflict, message).with_details(
                serde_json::json!({
                    "namespace": external.namespace,
                    "external_id": external.external_id,
                    "current_entity_id": existing,
                    "requested_entity_id": requested,
                }),
            ),
            CanonError::Registry(RegistryError::StaleExpectation {
                external,
                expected,
                actual,
            }) => ApiError::new(ErrorCode::MappingConflict, message).with_details(
                serde_json::json!({
                    "namespace": external.namespace,
                    "external_id": external.external_id,
                    "expected_entity_id": expected,
                    "current_entity_id": actual,
                }),
            ),
            CanonError::Feed(FeedError::CursorExpired {
                partition,
                sequence,
                horizon,
            }) => ApiError::new(ErrorCode::CursorExpired, message).with_details(
                serde_json::json!({
                    "partition": partition,
                    "sequence": sequence,
                    "horizon": horizon,
                    "snapshot": format!("/v1/snapshot?partition={}", partition),
                }),
            ),
            CanonError::Feed(FeedError::MalformedCursor { .. }) => {
                ApiError::new(ErrorCode::InvalidFormat, message)
            }
            CanonError::Feed(_) => ApiError::new(ErrorCode::InvalidInput, message),
            CanonError::Validation(_) => ApiError::new(ErrorCode::ValidationFailed, message),
            CanonError::Config(_) => {
                tracing::error!(error = %message, "Configuration error");
                ApiError::new(ErrorCode::InternalError, message)
            }
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
