//! Request logging middleware for the Licensor server.
//!
//! Every request gets a fresh id, a tracing span carrying method and path, and
//! a completion line with status and duration. The id is echoed back in the
//! `X-Request-Id` response header.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Logging middleware that tracks request timing and generates request IDs.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let duration = start.elapsed();

    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        )
    });

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

/// Health check response structure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub version: String,
    pub store: StoreHealth,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    /// sqlite, postgres or memory
    pub store_type: String,
}

impl HealthResponse {
    pub fn healthy(connected: bool, store_type: &str) -> Self {
        Self {
            status: if connected { "healthy" } else { "degraded" }.to_string(),
            service: "licensor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreHealth {
                connected,
                store_type: store_type.to_string(),
            },
        }
    }
}
