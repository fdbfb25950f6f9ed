//! # Core Error Types
//!
//! Unified error handling for every subsystem. Errors are classified by
//! kind, not by the component that raised them.

use serde::Serialize;
use thiserror::Error;

/// Core result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Error classification, used to pick retry and surfacing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed input; never retried
    Input,
    /// Missing resource; never retried
    Lookup,
    /// State conflict; never retried
    Conflict,
    /// Transient infrastructure failure; the caller may retry
    Infrastructure,
    /// Broken internal invariant; masked at the surface
    Internal,
}

/// Unified error type with stable error codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidBody(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("tenant already exists: {0}")]
    TenantExists(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("system model is protected: {0}")]
    SystemModelProtected(String),

    #[error("record is trashed: {0}")]
    TrashedRecord(String),

    #[error("record is deleted: {0}")]
    DeletedRecord(String),

    #[error("record already trashed: {0}")]
    AlreadyTrashed(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The detail message is written to the server log only; the surface
    /// renders the masked code.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Self::FieldNotFound(_) => "FIELD_NOT_FOUND",
            Self::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::TenantExists(_) => "TENANT_EXISTS",
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::SystemModelProtected(_) => "SYSTEM_MODEL_PROTECTED",
            Self::TrashedRecord(_) => "TRASHED_RECORD",
            Self::DeletedRecord(_) => "DELETED_RECORD",
            Self::AlreadyTrashed(_) => "ALREADY_TRASHED",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidBody(_) => ErrorKind::Input,
            Self::RecordNotFound(_)
            | Self::ModelNotFound(_)
            | Self::FieldNotFound(_)
            | Self::SchemaNotFound(_)
            | Self::ColumnNotFound(_)
            | Self::TenantNotFound(_) => ErrorKind::Lookup,
            Self::TenantExists(_)
            | Self::SystemModelProtected(_)
            | Self::TrashedRecord(_)
            | Self::DeletedRecord(_)
            | Self::AlreadyTrashed(_)
            | Self::AccessDenied(_) => ErrorKind::Conflict,
            Self::Timeout(_) => ErrorKind::Infrastructure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidBody(_) => 400,
            Self::AccessDenied(_) => 403,
            Self::RecordNotFound(_)
            | Self::ModelNotFound(_)
            | Self::FieldNotFound(_)
            | Self::SchemaNotFound(_)
            | Self::ColumnNotFound(_)
            | Self::TenantNotFound(_) => 404,
            Self::TenantExists(_)
            | Self::SystemModelProtected(_)
            | Self::TrashedRecord(_)
            | Self::DeletedRecord(_)
            | Self::AlreadyTrashed(_) => 409,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error, logging the detail that will be masked
    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(detail = %msg, "internal error");
        Self::Internal(msg)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::internal(format!("database: {}", e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(format!("io: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            ApiError::Validation("x".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            ApiError::TenantExists("acme".into()).error_code(),
            "TENANT_EXISTS"
        );
        assert_eq!(
            ApiError::SystemModelProtected("models".into()).error_code(),
            "SYSTEM_MODEL_PROTECTED"
        );
        assert_eq!(ApiError::Timeout("query".into()).error_code(), "TIMEOUT");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::InvalidBody("x".into()).status_code(), 400);
        assert_eq!(ApiError::RecordNotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::AlreadyTrashed("x".into()).status_code(), 409);
        assert_eq!(ApiError::Internal("x".into()).status_code(), 500);
        assert_eq!(ApiError::Timeout("x".into()).status_code(), 504);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(ApiError::Validation("x".into()).kind(), ErrorKind::Input);
        assert_eq!(ApiError::ModelNotFound("x".into()).kind(), ErrorKind::Lookup);
        assert_eq!(
            ApiError::TrashedRecord("x".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ApiError::Timeout("x".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_internal_display_is_masked() {
        let err = ApiError::Internal("connection refused on 10.0.0.3".into());
        assert_eq!(err.to_string(), "internal error");
    }
}
