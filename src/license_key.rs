//! License key generation and validation.
//!
//! Keys are human-typable groups of uppercase alphanumerics joined by hyphens.
//! The default layout is `XXXX-XXXX-XXXX-XXXX-XXXX` (5 groups of 4).
//!
//! # Example
//!
//! ```rust
//! use licensor::license_key::{KeyGenerator, validate_license_key_format, LicenseKeyConfig};
//!
//! let generator = KeyGenerator::default();
//! let key = generator.generate();
//! assert!(validate_license_key_format(&key, &LicenseKeyConfig::default()));
//! ```

use rand::Rng;
use regex::Regex;
use std::future::Future;
use tracing::{debug, warn};

use crate::config::LicenseConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::store::LicenseStore;

/// Character set for license key generation.
const LICENSE_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Layout of generated keys.
#[derive(Debug, Clone)]
pub struct LicenseKeyConfig {
    /// Number of groups
    pub segments: u8,
    /// Length of each group
    pub segment_length: u8,
    /// Attempts `generate_unique` makes before giving up
    pub max_attempts: u32,
}

impl Default for LicenseKeyConfig {
    fn default() -> Self {
        Self {
            segments: 5,
            segment_length: 4,
            max_attempts: 5,
        }
    }
}

impl From<&LicenseConfig> for LicenseKeyConfig {
    fn from(config: &LicenseConfig) -> Self {
        Self {
            segments: config.key_segments,
            segment_length: config.key_segment_length,
            max_attempts: config.key_max_attempts,
        }
    }
}

/// Generate a single group of random characters.
fn generate_segment(length: u8) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..LICENSE_KEY_CHARSET.len());
            LICENSE_KEY_CHARSET[idx] as char
        })
        .collect()
}

/// Generate a license key with the given layout.
pub fn generate_license_key(config: &LicenseKeyConfig) -> String {
    (0..config.segments)
        .map(|_| generate_segment(config.segment_length))
        .collect::<Vec<_>>()
        .join("-")
}

/// Validate that a license key matches the expected layout.
///
/// ```rust
/// use licensor::license_key::{validate_license_key_format, LicenseKeyConfig};
///
/// let config = LicenseKeyConfig::default();
/// assert!(validate_license_key_format("AB12-CD34-EF56-GH78-IJ90", &config));
/// assert!(!validate_license_key_format("ab12-CD34-EF56-GH78-IJ90", &config));
/// ```
pub fn validate_license_key_format(key: &str, config: &LicenseKeyConfig) -> bool {
    if config.segments == 0 || config.segment_length == 0 {
        return false;
    }
    let pattern = format!(
        r"^[A-Z0-9]{{{len}}}(-[A-Z0-9]{{{len}}}){{{rest}}}$",
        len = config.segment_length,
        rest = config.segments - 1
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(key),
        Err(e) => {
            warn!("invalid license key pattern {pattern}: {e}");
            false
        }
    }
}

/// Split a key into its groups. Returns `None` for an empty key.
pub fn parse_license_key(key: &str) -> Option<Vec<String>> {
    if key.is_empty() {
        return None;
    }
    Some(key.split('-').map(str::to_string).collect())
}

/// Generate a unique key, asking `exists_fn` whether each candidate is taken.
///
/// Gives up with `KeyGenerationExhausted` after `config.max_attempts` collisions.
pub async fn generate_unique_license_key<F, Fut>(
    config: &LicenseKeyConfig,
    exists_fn: F,
) -> LicenseResult<String>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = LicenseResult<bool>>,
{
    for attempt in 1..=config.max_attempts {
        let key = generate_license_key(config);
        if !exists_fn(key.clone()).await? {
            return Ok(key);
        }
        debug!(attempt, "generated license key collided with an existing key");
    }

    warn!(
        attempts = config.max_attempts,
        "failed to generate a unique license key"
    );
    Err(LicenseError::KeyGenerationExhausted(config.max_attempts))
}

/// Produces license keys; uniqueness checks go through a [`LicenseStore`].
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    config: LicenseKeyConfig,
}

impl KeyGenerator {
    pub fn new(config: LicenseKeyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LicenseKeyConfig {
        &self.config
    }

    pub fn generate(&self) -> String {
        generate_license_key(&self.config)
    }

    /// Generate a key that no license in `store` uses (trashed ones included).
    pub async fn generate_unique(&self, store: &dyn LicenseStore) -> LicenseResult<String> {
        generate_unique_license_key(&self.config, |key| async move { store.exists(&key).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn generate_key_has_correct_format() {
        let key = KeyGenerator::default().generate();
        let re = Regex::new(r"^[A-Z0-9]{4}(-[A-Z0-9]{4}){4}$").unwrap();
        assert!(re.is_match(&key), "unexpected key format: {key}");
    }

    #[test]
    fn generated_keys_always_match_the_format() {
        let config = LicenseKeyConfig::default();
        for _ in 0..500 {
            let key = generate_license_key(&config);
            assert!(validate_license_key_format(&key, &config), "bad key {key}");
        }
    }

    #[test]
    fn generate_key_with_custom_layout() {
        let config = LicenseKeyConfig {
            segments: 3,
            segment_length: 5,
            max_attempts: 5,
        };
        let key = generate_license_key(&config);
        let parts = parse_license_key(&key).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 5));
        assert!(validate_license_key_format(&key, &config));
    }

    #[test]
    fn validate_format_rejects_bad_keys() {
        let config = LicenseKeyConfig::default();
        assert!(!validate_license_key_format("AB12-CD34-EF56-GH78", &config));
        assert!(!validate_license_key_format(
            "AB12-CD34-EF56-GH78-IJ90-KL12",
            &config
        ));
        assert!(!validate_license_key_format("AB1-CD34-EF56-GH78-IJ90", &config));
        assert!(!validate_license_key_format("AB12-CD34-EF56-GH78-IJ9!", &config));
        assert!(!validate_license_key_format("", &config));
    }

    #[test]
    fn parse_key_extracts_groups() {
        let parts = parse_license_key("AB12-CD34-EF56-GH78-IJ90").unwrap();
        assert_eq!(parts, vec!["AB12", "CD34", "EF56", "GH78", "IJ90"]);
        assert!(parse_license_key("").is_none());
    }

    #[test]
    fn generated_keys_are_unique() {
        let generator = KeyGenerator::default();
        let mut keys = HashSet::new();
        for _ in 0..1000 {
            let key = generator.generate();
            assert!(keys.insert(key.clone()), "Duplicate key generated: {}", key);
        }
    }

    #[tokio::test]
    async fn unique_key_returns_first_free_candidate() {
        let calls = AtomicU32::new(0);
        let key = generate_unique_license_key(&LicenseKeyConfig::default(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n < 2) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(validate_license_key_format(&key, &LicenseKeyConfig::default()));
    }

    #[tokio::test]
    async fn unique_key_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = generate_unique_license_key(&LicenseKeyConfig::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, LicenseError::KeyGenerationExhausted(5));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unique_key_propagates_store_errors() {
        let err = generate_unique_license_key(&LicenseKeyConfig::default(), |_| async {
            Err(LicenseError::PersistenceFailure("offline".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, LicenseError::PersistenceFailure(_)));
    }
}
