//! Structured logging for Licensor.
//!
//! [`init_logging`] installs a `tracing` subscriber filtered by `RUST_LOG` (or
//! the configured level). [`log_license_event`] is the single place license
//! state changes are written to the log.

use tracing::{info, info_span, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::audit::AuditEventType;
use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// Returns `false` when logging is disabled or a subscriber was already set,
/// which makes it safe to call from tests and binaries alike.
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("licensor={}", config.level.to_lowercase())));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Log a license state change.
///
/// Failed activations and validations are logged at `warn`, everything else
/// at `info`.
pub fn log_license_event(event: AuditEventType, license_key: &str, details: Option<&str>) {
    let span = info_span!(
        "license_event",
        event = %event,
        license_key = %license_key,
    );
    let _enter = span.enter();

    match (event.is_failure(), details) {
        (true, Some(d)) => warn!(reason = %d, "License event occurred"),
        (true, None) => warn!("License event occurred"),
        (false, Some(d)) => info!(details = %d, "License event occurred"),
        (false, None) => info!("License event occurred"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_installs_nothing() {
        let config = LoggingConfig {
            enabled: false,
            level: "debug".to_string(),
        };
        assert!(!init_logging(&config));
    }

    #[test]
    fn second_init_is_harmless() {
        let config = LoggingConfig {
            enabled: true,
            level: "info".to_string(),
        };
        init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn logging_events_without_subscriber_does_not_panic() {
        log_license_event(AuditEventType::Activated, "AAAA-BBBB", Some("example.com"));
        log_license_event(AuditEventType::ActivationDenied, "AAAA-BBBB", None);
    }
}
