//! Configuration system for Licensor.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `licensor.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `LICENSOR_SERVER_HOST` - Server bind address
//! - `LICENSOR_SERVER_PORT` - Server port
//! - `LICENSOR_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `LICENSOR_DATABASE_URL` - Database connection URL
//! - `LICENSOR_KEY_MAX_ATTEMPTS` - Attempts before key generation gives up
//! - `LICENSOR_DEFAULT_ACTIVATION_LIMIT` - Activation limit for new licenses (0 = unlimited)
//! - `LICENSOR_LOGGING_ENABLED` - Install the tracing subscriber
//! - `LICENSOR_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `LICENSOR_JOBS_ENABLED` - Start background jobs with the server
//! - `LICENSOR_EXPIRY_WARNING_DAYS` - Days ahead of expiry to warn customers
//! - `LICENSOR_AUTH_ENABLED` - Require an API key on admin endpoints
//! - `LICENSOR_API_KEYS` - Comma-separated admin API keys
//! - `LICENSOR_RATE_LIMIT_ENABLED` - Rate limit client endpoints per IP
//! - `LICENSOR_RATE_LIMIT_RPM` - Client requests per minute per IP

use config::{Config, ConfigError as RawConfigError};
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};

/// Global configuration singleton.
static CONFIG: OnceLock<LicensorConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LicensorConfig {
    pub server: ServerConfig,
    pub license: LicenseConfig,
    pub activation: ActivationConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub jobs: JobsConfig,
    pub audit: AuditConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// License key generation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Number of hyphen-separated groups in a key
    pub key_segments: u8,
    /// Characters per group
    pub key_segment_length: u8,
    /// Generation attempts before giving up on a unique key
    pub key_max_attempts: u32,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            key_segments: 5,
            key_segment_length: 4,
            key_max_attempts: 5,
        }
    }
}

/// Defaults applied to newly created licenses.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Activation limit for new licenses (0 = unlimited)
    pub default_activation_limit: u32,
    pub require_email_match: bool,
    pub require_domain_whitelist: bool,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            default_activation_limit: 1,
            require_email_match: false,
            require_domain_whitelist: false,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    pub sqlite_url: String,
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://licensor.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/licensor".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

/// Background job configuration (used with the `background-jobs` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    /// Cron expression for rewriting stale `active` licenses to `expired`
    pub expiry_reconciliation_cron: String,
    /// Cron expression for the expiry warning sweep
    pub expiry_warning_cron: String,
    /// Warn customers this many days before expiry
    pub expiry_warning_days: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Every hour at minute 15
            expiry_reconciliation_cron: "0 15 * * * *".to_string(),
            // Daily at 6 AM
            expiry_warning_cron: "0 0 6 * * *".to_string(),
            expiry_warning_days: 7,
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries kept per license by the in-memory audit log
    pub max_entries_per_license: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries_per_license: 50,
        }
    }
}

/// Admin API authentication (used with the `server` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Keys accepted in the `X-Api-Key` header or as a bearer token
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys: Vec::new(),
        }
    }
}

/// Per-IP rate limiting of client endpoints (used with the `rate-limiting` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per minute per client IP on activate/deactivate/validate/info
    pub client_rpm: u32,
    /// Requests allowed above the steady rate in a short burst
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_rpm: 60,
            burst_size: 5,
        }
    }
}

fn config_error(e: RawConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = env::var(name)
        .ok()?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

impl LicensorConfig {
    /// Load configuration from file and environment.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `licensor.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .set_default("server.host", "127.0.0.1")
            .map_err(config_error)?
            .set_default("server.port", 8080)
            .map_err(config_error)?
            .set_default("license.key_segments", 5)
            .map_err(config_error)?
            .set_default("license.key_segment_length", 4)
            .map_err(config_error)?
            .set_default("license.key_max_attempts", 5)
            .map_err(config_error)?
            .set_default("activation.default_activation_limit", 1)
            .map_err(config_error)?
            .set_default("activation.require_email_match", false)
            .map_err(config_error)?
            .set_default("activation.require_domain_whitelist", false)
            .map_err(config_error)?
            .set_default("database.db_type", "sqlite")
            .map_err(config_error)?
            .set_default("database.sqlite_url", "sqlite://licensor.db?mode=rwc")
            .map_err(config_error)?
            .set_default("database.postgres_url", "postgres://localhost/licensor")
            .map_err(config_error)?
            .set_default("logging.enabled", false)
            .map_err(config_error)?
            .set_default("logging.level", "info")
            .map_err(config_error)?
            .set_default("jobs.enabled", false)
            .map_err(config_error)?
            .set_default("jobs.expiry_reconciliation_cron", "0 15 * * * *")
            .map_err(config_error)?
            .set_default("jobs.expiry_warning_cron", "0 0 6 * * *")
            .map_err(config_error)?
            .set_default("jobs.expiry_warning_days", 7)
            .map_err(config_error)?
            .set_default("audit.max_entries_per_license", 50)
            .map_err(config_error)?
            .set_default("auth.enabled", true)
            .map_err(config_error)?
            .set_default("auth.api_keys", Vec::<String>::new())
            .map_err(config_error)?
            .set_default("rate_limit.enabled", true)
            .map_err(config_error)?
            .set_default("rate_limit.client_rpm", 60)
            .map_err(config_error)?
            .set_default("rate_limit.burst_size", 5)
            .map_err(config_error)?
            // Load from licensor.toml (optional)
            .add_source(config::File::with_name("licensor").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("LICENSOR_SERVER_HOST").ok())
            .map_err(config_error)?
            .set_override_option("server.port", env_parsed::<i64>("LICENSOR_SERVER_PORT"))
            .map_err(config_error)?
            .set_override_option(
                "license.key_max_attempts",
                env_parsed::<i64>("LICENSOR_KEY_MAX_ATTEMPTS"),
            )
            .map_err(config_error)?
            .set_override_option(
                "activation.default_activation_limit",
                env_parsed::<i64>("LICENSOR_DEFAULT_ACTIVATION_LIMIT"),
            )
            .map_err(config_error)?
            .set_override_option("database.db_type", env::var("LICENSOR_DATABASE_TYPE").ok())
            .map_err(config_error)?
            .set_override_option(
                "database.sqlite_url",
                env::var("LICENSOR_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(config_error)?
            .set_override_option(
                "database.postgres_url",
                env::var("LICENSOR_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(config_error)?
            .set_override_option(
                "logging.enabled",
                env_parsed::<bool>("LICENSOR_LOGGING_ENABLED"),
            )
            .map_err(config_error)?
            .set_override_option("logging.level", env::var("LICENSOR_LOG_LEVEL").ok())
            .map_err(config_error)?
            .set_override_option("jobs.enabled", env_parsed::<bool>("LICENSOR_JOBS_ENABLED"))
            .map_err(config_error)?
            .set_override_option(
                "jobs.expiry_warning_days",
                env_parsed::<i64>("LICENSOR_EXPIRY_WARNING_DAYS"),
            )
            .map_err(config_error)?
            .set_override_option("auth.enabled", env_parsed::<bool>("LICENSOR_AUTH_ENABLED"))
            .map_err(config_error)?
            .set_override_option("auth.api_keys", env_list("LICENSOR_API_KEYS"))
            .map_err(config_error)?
            .set_override_option(
                "rate_limit.enabled",
                env_parsed::<bool>("LICENSOR_RATE_LIMIT_ENABLED"),
            )
            .map_err(config_error)?
            .set_override_option(
                "rate_limit.client_rpm",
                env_parsed::<i64>("LICENSOR_RATE_LIMIT_RPM"),
            )
            .map_err(config_error)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.license.key_segments == 0 {
            return Err(LicenseError::ConfigError(
                "license.key_segments must be greater than 0".to_string(),
            ));
        }
        if self.license.key_segment_length == 0 {
            return Err(LicenseError::ConfigError(
                "license.key_segment_length must be greater than 0".to_string(),
            ));
        }
        if self.license.key_max_attempts == 0 {
            return Err(LicenseError::ConfigError(
                "license.key_max_attempts must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.rate_limit.enabled && (self.rate_limit.client_rpm == 0 || self.rate_limit.burst_size == 0) {
            return Err(LicenseError::ConfigError(
                "rate_limit.client_rpm and rate_limit.burst_size must be greater than 0".to_string(),
            ));
        }

        if self.audit.max_entries_per_license == 0 {
            return Err(LicenseError::ConfigError(
                "audit.max_entries_per_license must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// Loads and validates on first access, then caches.
pub fn get_config() -> LicenseResult<&'static LicensorConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = LicensorConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is valid.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| LicenseError::ConfigError("configuration was not initialized".to_string()))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static LicensorConfig> {
    get_config()
}
