//! HTTP surface for Licensor (requires the `server` feature).
//!
//! - `api_error` → JSON error bodies and status mapping
//! - `auth`      → API key middleware for the admin routes
//! - `handlers`  → Axum handlers over a shared [`Licensor`](crate::Licensor)
//! - `logging`   → request logging middleware and health payload
//! - `rate_limit` → per-IP limits on client routes (requires `rate-limiting`)
//! - `routes`    → router builder

pub mod api_error;
pub mod auth;
pub mod handlers;
pub mod logging;
#[cfg(feature = "rate-limiting")]
pub mod rate_limit;
pub mod routes;

pub use api_error::{ApiError, ErrorBody, ErrorCode};
pub use auth::AuthState;
pub use handlers::AppState;
pub use routes::build_router;
