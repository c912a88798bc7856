//! API key authentication for the Licensor admin API.
//!
//! Admin endpoints require one of the configured keys, sent either as
//! `X-Api-Key: <key>` or `Authorization: Bearer <key>`. Client endpoints
//! (activate, deactivate, validate, info) stay open.
//!
//! # Configuration
//!
//! ```toml
//! [auth]
//! enabled = true
//! api_keys = ["change-me"]
//! ```
//!
//! Or `LICENSOR_API_KEYS=key-one,key-two`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::config::AuthConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::server::api_error::{ApiError, ErrorCode};

/// Header carrying the admin API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authentication state shared by the admin middleware.
#[derive(Clone, Debug)]
pub struct AuthState {
    enabled: bool,
    api_keys: Arc<Vec<String>>,
}

impl AuthState {
    /// Build from configuration. Enabled auth with no keys is a config error.
    pub fn from_config(config: &AuthConfig) -> LicenseResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let keys: Vec<String> = config
            .api_keys
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(LicenseError::ConfigError(
                "auth is enabled but auth.api_keys is empty; set LICENSOR_API_KEYS".to_string(),
            ));
        }
        Ok(Self::with_keys(keys))
    }

    pub fn with_keys(keys: Vec<String>) -> Self {
        Self {
            enabled: true,
            api_keys: Arc::new(keys),
        }
    }

    /// Lets every request through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            api_keys: Arc::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn accepts(&self, presented: &str) -> bool {
        // Check every key so timing does not reveal which one matched.
        self.api_keys.iter().fold(false, |found, key| {
            constant_time_eq(key.as_bytes(), presented.as_bytes()) | found
        })
    }
}

/// Key from `X-Api-Key`, falling back to a bearer token.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Byte comparison whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware rejecting admin requests without a valid API key.
pub async fn require_api_key(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    let verdict = extract_api_key(request.headers()).map(|key| auth.accepts(key));
    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => {
            warn!(path = %request.uri().path(), "Rejected admin request with invalid API key");
            ApiError::with_message(ErrorCode::Unauthorized, "Invalid API key").into_response()
        }
        None => ApiError::new(ErrorCode::Unauthorized).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn enabled_without_keys_is_rejected() {
        let config = AuthConfig {
            enabled: true,
            api_keys: vec!["  ".to_string()],
        };
        assert!(matches!(
            AuthState::from_config(&config),
            Err(LicenseError::ConfigError(_))
        ));
    }

    #[test]
    fn disabled_config_needs_no_keys() {
        let config = AuthConfig {
            enabled: false,
            api_keys: Vec::new(),
        };
        assert!(!AuthState::from_config(&config).unwrap().is_enabled());
    }

    #[test]
    fn accepts_any_configured_key() {
        let auth = AuthState::with_keys(vec!["first".into(), "second".into()]);
        assert!(auth.accepts("first"));
        assert!(auth.accepts("second"));
        assert!(!auth.accepts("secon"));
        assert!(!auth.accepts(""));
    }

    #[test]
    fn key_header_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-bearer"),
        );
        assert_eq!(extract_api_key(&headers), Some("from-bearer"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(extract_api_key(&headers), Some("from-header"));
    }

    #[test]
    fn basic_auth_is_not_a_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(extract_api_key(&headers), None);
    }
}
