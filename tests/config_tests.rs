use std::env;

use serial_test::serial;

use licensor::config::LicensorConfig;
use licensor::license_key::LicenseKeyConfig;
use licensor::LicenseError;

const VARS: &[&str] = &[
    "LICENSOR_SERVER_PORT",
    "LICENSOR_DATABASE_TYPE",
    "LICENSOR_DATABASE_URL",
    "LICENSOR_KEY_MAX_ATTEMPTS",
    "LICENSOR_DEFAULT_ACTIVATION_LIMIT",
    "LICENSOR_LOG_LEVEL",
    "LICENSOR_EXPIRY_WARNING_DAYS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn load_without_overrides_uses_defaults() {
    clear_env();

    let config = LicensorConfig::load().unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.database.db_type, "sqlite");
    assert_eq!(config.activation.default_activation_limit, 1);
    assert_eq!(config.jobs.expiry_warning_days, 7);
}

#[test]
#[serial]
fn env_overrides_file_and_defaults() {
    clear_env();
    env::set_var("LICENSOR_SERVER_PORT", "9443");
    env::set_var("LICENSOR_DEFAULT_ACTIVATION_LIMIT", "0");
    env::set_var("LICENSOR_KEY_MAX_ATTEMPTS", "12");
    env::set_var("LICENSOR_EXPIRY_WARNING_DAYS", "14");

    let config = LicensorConfig::load().unwrap();
    clear_env();

    assert_eq!(config.server.port, 9443);
    assert_eq!(config.activation.default_activation_limit, 0);
    assert_eq!(config.jobs.expiry_warning_days, 14);

    let keys = LicenseKeyConfig::from(&config.license);
    assert_eq!(keys.max_attempts, 12);
}

#[test]
#[serial]
fn database_url_is_routed_by_scheme() {
    clear_env();
    env::set_var("LICENSOR_DATABASE_TYPE", "postgres");
    env::set_var("LICENSOR_DATABASE_URL", "postgres://licensor@db/licensor");

    let config = LicensorConfig::load().unwrap();
    clear_env();

    assert_eq!(config.database.db_type, "postgres");
    assert_eq!(config.database.postgres_url, "postgres://licensor@db/licensor");
    assert!(config.database.sqlite_url.starts_with("sqlite"));
}

#[test]
#[serial]
fn invalid_overrides_fail_validation() {
    clear_env();
    env::set_var("LICENSOR_DATABASE_TYPE", "oracle");

    let config = LicensorConfig::load().unwrap();
    clear_env();

    assert!(matches!(
        config.validate(),
        Err(LicenseError::ConfigError(msg)) if msg.contains("oracle")
    ));
}

#[test]
#[serial]
fn unparsable_numbers_are_ignored() {
    clear_env();
    env::set_var("LICENSOR_SERVER_PORT", "not-a-port");

    let config = LicensorConfig::load().unwrap();
    clear_env();

    assert_eq!(config.server.port, 8080);
}
