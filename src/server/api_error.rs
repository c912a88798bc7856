//! Error responses for the Licensor HTTP API.
//!
//! Every endpoint answers failures with the same JSON shape:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "LIMIT_REACHED",
//!     "message": "Activation limit reached",
//!     "details": null
//!   }
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::LicenseError;

/// Machine-readable error codes. Stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === Denials (4xx) ===
    /// No live license or product with that identifier
    LicenseNotFound,
    /// License is inactive or trashed
    LicenseInactive,
    /// Expiry day has passed
    LicenseExpired,
    /// Request email does not match the license owner
    EmailMismatch,
    /// Domain is not on the license's whitelist, or not activated
    DomainNotAllowed,
    /// Every activation slot is taken
    LimitReached,
    /// Request names a different product than the license
    ProductMismatch,

    // === Access (401) ===
    /// Admin request without a valid API key
    Unauthorized,

    // === Validation Errors (400) ===
    /// Request payload is invalid or malformed
    InvalidRequest,

    // === Server Errors (5xx) ===
    /// Key space too crowded to find a free key
    KeyGenerationExhausted,
    /// Store operation failed
    DatabaseError,
    /// Server configuration error
    ConfigError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,

            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::LicenseInactive
            | ErrorCode::LicenseExpired
            | ErrorCode::EmailMismatch
            | ErrorCode::DomainNotAllowed
            | ErrorCode::LimitReached
            | ErrorCode::ProductMismatch => StatusCode::FORBIDDEN,

            ErrorCode::LicenseNotFound => StatusCode::NOT_FOUND,

            ErrorCode::KeyGenerationExhausted => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::DatabaseError | ErrorCode::ConfigError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::LicenseNotFound => "The requested license does not exist",
            ErrorCode::LicenseInactive => "License is not active",
            ErrorCode::LicenseExpired => "License has expired",
            ErrorCode::EmailMismatch => "Email does not match the license owner",
            ErrorCode::DomainNotAllowed => "Domain is not allowed for this license",
            ErrorCode::LimitReached => "Activation limit reached",
            ErrorCode::ProductMismatch => "License does not belong to this product",
            ErrorCode::Unauthorized => "A valid API key is required",
            ErrorCode::InvalidRequest => "Request payload is invalid",
            ErrorCode::KeyGenerationExhausted => "Could not generate a unique license key",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ConfigError => "Server configuration error",
        }
    }
}

impl From<&LicenseError> for ErrorCode {
    fn from(err: &LicenseError) -> Self {
        match err {
            LicenseError::NotFound(_) => ErrorCode::LicenseNotFound,
            LicenseError::NotActive => ErrorCode::LicenseInactive,
            LicenseError::Expired => ErrorCode::LicenseExpired,
            LicenseError::EmailMismatch => ErrorCode::EmailMismatch,
            LicenseError::DomainNotAllowed => ErrorCode::DomainNotAllowed,
            LicenseError::LimitReached => ErrorCode::LimitReached,
            LicenseError::ProductMismatch => ErrorCode::ProductMismatch,
            LicenseError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            LicenseError::KeyGenerationExhausted(_) => ErrorCode::KeyGenerationExhausted,
            LicenseError::PersistenceFailure(_) => ErrorCode::DatabaseError,
            LicenseError::ConfigError(_) => ErrorCode::ConfigError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Top-level error response returned by all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

impl ApiError {
    /// Error with the code's default message.
    pub fn new(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error.code, self.error.message)
    }
}

impl std::error::Error for ApiError {}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        let code = ErrorCode::from(&err);
        match err {
            // Store internals stay in the server log.
            LicenseError::PersistenceFailure(_) => ApiError::new(code),
            LicenseError::NotFound(ref what) => ApiError::with_message(code, err.to_string())
                .details(serde_json::json!({ "key": what })),
            other => ApiError::with_message(code, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(
            ErrorCode::LicenseNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ErrorCode::LimitReached.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::InvalidRequest.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::KeyGenerationExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DomainNotAllowed).unwrap();
        assert_eq!(json, "\"DOMAIN_NOT_ALLOWED\"");
    }

    #[test]
    fn denials_map_to_matching_codes() {
        let cases = [
            (LicenseError::NotActive, ErrorCode::LicenseInactive),
            (LicenseError::Expired, ErrorCode::LicenseExpired),
            (LicenseError::EmailMismatch, ErrorCode::EmailMismatch),
            (LicenseError::DomainNotAllowed, ErrorCode::DomainNotAllowed),
            (LicenseError::LimitReached, ErrorCode::LimitReached),
            (LicenseError::ProductMismatch, ErrorCode::ProductMismatch),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).error.code, code);
        }
    }

    #[test]
    fn persistence_details_are_hidden() {
        let api = ApiError::from(LicenseError::PersistenceFailure(
            "UNIQUE constraint failed: licenses.key".into(),
        ));
        assert_eq!(api.error.code, ErrorCode::DatabaseError);
        assert!(!api.error.message.contains("UNIQUE"));
    }

    #[test]
    fn not_found_carries_key() {
        let api = ApiError::from(LicenseError::NotFound("ABCD-1234".into()));
        assert_eq!(api.error.code, ErrorCode::LicenseNotFound);
        assert_eq!(api.error.details.unwrap()["key"], "ABCD-1234");
    }

    #[test]
    fn error_body_skips_empty_details() {
        let json = serde_json::to_value(ApiError::new(ErrorCode::LimitReached)).unwrap();
        assert!(json["error"].get("details").is_none());
        assert_eq!(json["error"]["code"], "LIMIT_REACHED");
    }
}
