//! Error types shared by every Licensor component.
//!
//! Policy denials (`NotActive`, `Expired`, `EmailMismatch`, `DomainNotAllowed`,
//! `LimitReached`, `ProductMismatch`) are terminal, user-facing outcomes.
//! `PersistenceFailure` and `KeyGenerationExhausted` are the only kinds a caller
//! may reasonably retry once.

use thiserror::Error;

/// Result alias used across the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    /// No license (or product) exists for the given identifier.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("license is not active")]
    NotActive,

    #[error("license has expired")]
    Expired,

    #[error("customer email does not match this license")]
    EmailMismatch,

    #[error("domain is not authorized for this license")]
    DomainNotAllowed,

    #[error("license has reached its activation limit")]
    LimitReached,

    /// The request names a product the license was not issued for.
    #[error("license is not valid for the specified product")]
    ProductMismatch,

    #[error("failed to generate a unique license key after {0} attempts")]
    KeyGenerationExhausted(u32),

    /// Wraps any storage I/O or consistency error.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl LicenseError {
    /// True for the outcomes produced by the validation policy.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            LicenseError::NotActive
                | LicenseError::Expired
                | LicenseError::EmailMismatch
                | LicenseError::DomainNotAllowed
                | LicenseError::LimitReached
                | LicenseError::ProductMismatch
        )
    }

    /// True when a single retry by the caller may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LicenseError::PersistenceFailure(_) | LicenseError::KeyGenerationExhausted(_)
        )
    }

    /// Stable snake_case tag, used as the audit event suffix and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LicenseError::NotFound(_) => "not_found",
            LicenseError::NotActive => "not_active",
            LicenseError::Expired => "expired",
            LicenseError::EmailMismatch => "email_mismatch",
            LicenseError::DomainNotAllowed => "domain_not_allowed",
            LicenseError::LimitReached => "limit_reached",
            LicenseError::ProductMismatch => "product_mismatch",
            LicenseError::KeyGenerationExhausted(_) => "key_generation_exhausted",
            LicenseError::PersistenceFailure(_) => "persistence_failure",
            LicenseError::InvalidRequest(_) => "invalid_request",
            LicenseError::ConfigError(_) => "config_error",
        }
    }
}
