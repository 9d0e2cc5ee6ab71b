use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Clients match on these —
// never on the human-readable message string.

/// Stable error code constants.
///
/// Clients should match on `code` from `{"code": "NOT_FOUND", "message": "..."}`.
/// Codes never change; messages may be reworded.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const NAMESPACE_MISMATCH: &str = "NAMESPACE_MISMATCH";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified service error type used across all crates.
///
/// Each variant maps to a stable error code (see [`error_code`]) and an
/// HTTP status code. The JSON response always includes both:
///
/// ```json
/// {"code": "NOT_FOUND", "message": "task 'abc' not found"}
/// ```
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Resource does not exist. HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// Input data is invalid. HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// A URN addressed to a different connector namespace. HTTP 400.
    #[error("{0}")]
    NamespaceMismatch(String),

    /// Storage backend failure. HTTP 500.
    #[error("{0}")]
    Storage(String),

    /// Unexpected internal error. HTTP 500.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::NamespaceMismatch(_) => error_code::NAMESPACE_MISMATCH,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NamespaceMismatch(_) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

// ── ValidationErrors ────────────────────────────────────────────────

/// Accumulates per-field validation failures before any persistence happens.
///
/// Collect all failures first, then convert with [`ValidationErrors::into_result`]
/// so a caller sees every bad field in one round trip.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    failures: Vec<(String, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for a named field.
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.failures.push((field.to_string(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// The recorded (field, message) pairs.
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    /// `Ok(())` when no failures were recorded, otherwise a
    /// [`ServiceError::Validation`] listing every field.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(
                self.failures
                    .iter()
                    .map(|(field, msg)| format!("{field}: {msg}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(ServiceError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::NamespaceMismatch("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::Storage("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ServiceError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(ServiceError::NotFound("x".into()).error_code(), "NOT_FOUND");
        assert_eq!(ServiceError::Validation("x".into()).error_code(), "VALIDATION_FAILED");
        assert_eq!(
            ServiceError::NamespaceMismatch("x".into()).error_code(),
            "NAMESPACE_MISMATCH"
        );
        assert_eq!(ServiceError::Storage("x".into()).error_code(), "STORAGE_ERROR");
        assert_eq!(ServiceError::Internal("x".into()).error_code(), "INTERNAL");
    }

    #[test]
    fn error_display_is_just_message() {
        assert_eq!(ServiceError::NotFound("task 123".into()).to_string(), "task 123");
        assert_eq!(ServiceError::Validation("bad input".into()).to_string(), "bad input");
    }

    #[test]
    fn validation_errors_aggregate() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());
        errors.push("retryCount", "must be >= 1");
        errors.push("retainFor", "must be -1 or >= 0");

        let err = errors.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("retryCount: must be >= 1"));
        assert!(msg.contains("retainFor: must be -1 or >= 0"));
    }

    #[test]
    fn empty_validation_errors_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
