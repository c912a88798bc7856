//! Per-IP rate limiting for the client endpoints (requires the `rate-limiting` feature).
//!
//! Activate, deactivate, validate and info are reachable by every installed
//! copy of a product, so they share one per-IP budget.
//!
//! ```toml
//! [rate_limit]
//! enabled = true
//! client_rpm = 60   # requests per minute per IP
//! burst_size = 5    # short bursts above the steady rate
//! ```
//!
//! `SmartIpKeyExtractor` reads `X-Forwarded-For`, `X-Real-IP` and `Forwarded`
//! before falling back to the peer address, so the server must be started with
//! `into_make_service_with_connect_info::<SocketAddr>()`.

use std::sync::Arc;

use governor::middleware::NoOpMiddleware;
use tower_governor::governor::GovernorConfigBuilder;

pub use tower_governor::key_extractor::SmartIpKeyExtractor;
pub use tower_governor::GovernorLayer;

use crate::config::RateLimitConfig;
use crate::errors::{LicenseError, LicenseResult};

/// Replenish interval for a requests-per-minute budget.
fn replenish_interval_ms(rpm: u32) -> u64 {
    if rpm > 0 {
        (60_000 / u64::from(rpm)).max(1)
    } else {
        60_000
    }
}

/// Rate limiting layer for the client endpoints.
pub fn client_rate_limiter(
    config: &RateLimitConfig,
) -> LicenseResult<GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware>> {
    let governor_config = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(config.client_rpm))
        .burst_size(config.burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| {
            LicenseError::ConfigError(
                "rate_limit.client_rpm and rate_limit.burst_size must be greater than 0"
                    .to_string(),
            )
        })?;

    Ok(GovernorLayer {
        config: Arc::new(governor_config),
    })
}
