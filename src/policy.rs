//! Activation rules.
//!
//! [`ValidationPolicy`] evaluates, in order:
//!
//! 0. product named by the request matches the license (when given)
//! 1. stored status is `active`
//! 2. expiry is not in the past
//! 3. customer email matches (when `require_email_match`)
//! 4. domain is whitelisted (when `require_domain_whitelist` and the whitelist is non-empty)
//! 5. domain already activated → allow without consuming a slot
//! 6. activation limit not reached (0 = unlimited)
//!
//! Domains are compared exactly after [`normalize_domain`].

use chrono::NaiveDate;
use serde::Serialize;

use crate::errors::LicenseError;
use crate::model::{License, LicenseStatus, ProductRef};

/// Why an activation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    ProductMismatch,
    NotActive,
    Expired,
    EmailMismatch,
    DomainNotAllowed,
    LimitReached,
}

impl From<Denial> for LicenseError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::ProductMismatch => LicenseError::ProductMismatch,
            Denial::NotActive => LicenseError::NotActive,
            Denial::Expired => LicenseError::Expired,
            Denial::EmailMismatch => LicenseError::EmailMismatch,
            Denial::DomainNotAllowed => LicenseError::DomainNotAllowed,
            Denial::LimitReached => LicenseError::LimitReached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `already_active` means the domain holds a slot already; nothing to persist.
    Allow { already_active: bool },
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// What an activation request asks for, after the engine has normalized the domain.
#[derive(Debug, Clone, Copy)]
pub struct ActivationAttempt<'a> {
    pub email: Option<&'a str>,
    /// Normalized domain.
    pub domain: &'a str,
    pub product: Option<&'a ProductRef>,
    pub today: NaiveDate,
}

/// Pluggable activation rules consulted by the activation engine.
pub trait ActivationPolicy: Send + Sync {
    fn check_activation(&self, license: &License, attempt: &ActivationAttempt<'_>) -> Decision;
}

/// The default rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPolicy;

impl ValidationPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Rules 0-2: product, status and expiry. Shared with plain validation.
    pub fn check_standing(
        license: &License,
        product: Option<&ProductRef>,
        today: NaiveDate,
    ) -> Result<(), Denial> {
        if product.is_some_and(|p| p != &license.product) {
            return Err(Denial::ProductMismatch);
        }
        if license.status != LicenseStatus::Active {
            return Err(Denial::NotActive);
        }
        if license.is_expired(today) {
            return Err(Denial::Expired);
        }
        Ok(())
    }
}

impl ActivationPolicy for ValidationPolicy {
    fn check_activation(&self, license: &License, attempt: &ActivationAttempt<'_>) -> Decision {
        if let Err(denial) = Self::check_standing(license, attempt.product, attempt.today) {
            return Decision::Deny(denial);
        }

        if license.flags.require_email_match {
            if let Some(expected) = license.customer_email.as_deref() {
                let provided = attempt.email.map(str::trim).unwrap_or_default();
                if provided != expected.trim() {
                    return Decision::Deny(Denial::EmailMismatch);
                }
            }
        }

        if license.flags.require_domain_whitelist
            && !license.allowed_domains.is_empty()
            && !domain_in_whitelist(attempt.domain, license.allowed_domains.iter())
        {
            return Decision::Deny(Denial::DomainNotAllowed);
        }

        if license.activated_domains.contains(attempt.domain) {
            return Decision::Allow {
                already_active: true,
            };
        }

        if !license.is_unlimited() && license.activation_count() >= license.activation_limit {
            return Decision::Deny(Denial::LimitReached);
        }

        Decision::Allow {
            already_active: false,
        }
    }
}

fn domain_in_whitelist<'a>(domain: &str, whitelist: impl Iterator<Item = &'a String>) -> bool {
    whitelist
        .map(|allowed| normalize_domain(allowed))
        .any(|allowed| !allowed.is_empty() && allowed == domain)
}

/// Reduce a URL or hostname to the form used for every domain comparison.
///
/// Strips the scheme, anything from the first `/`, `?` or `#`, a leading
/// `www.`, and lowercases. `https://www.Example.com/path` → `example.com`.
pub fn normalize_domain(input: &str) -> String {
    let mut domain = input.trim();

    for scheme in ["https://", "http://"] {
        if domain
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        {
            domain = &domain[scheme.len()..];
            break;
        }
    }

    if let Some(end) = domain.find(['/', '?', '#']) {
        domain = &domain[..end];
    }

    let lowered = domain.to_lowercase();
    match lowered.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Expiry, ValidationFlags};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn license() -> License {
        let mut license = License::new("KEY", ProductRef::Internal("plugin".into()));
        license.activation_limit = 2;
        license.customer_email = Some("owner@example.com".into());
        license
    }

    fn attempt<'a>(domain: &'a str, email: Option<&'a str>) -> ActivationAttempt<'a> {
        ActivationAttempt {
            email,
            domain,
            product: None,
            today: date("2026-01-01"),
        }
    }

    fn check(license: &License, attempt: ActivationAttempt<'_>) -> Decision {
        ValidationPolicy.check_activation(license, &attempt)
    }

    #[test]
    fn normalization_strips_scheme_www_and_path() {
        assert_eq!(normalize_domain("https://www.Example.com/path"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("  HTTP://shop.example.com?x=1 "), "shop.example.com");
        assert_eq!(normalize_domain("www.example.com#top"), "example.com");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn subdomains_do_not_match_their_parent() {
        assert_ne!(normalize_domain("sub.example.com"), normalize_domain("example.com"));
    }

    #[test]
    fn inactive_license_is_denied() {
        let mut license = license();
        license.status = LicenseStatus::Inactive;
        assert_eq!(
            check(&license, attempt("example.com", None)),
            Decision::Deny(Denial::NotActive)
        );
    }

    #[test]
    fn past_expiry_is_denied_even_if_stored_status_is_active() {
        let mut license = license();
        license.expiry = Expiry::On(date("2020-01-01"));
        assert_eq!(license.status, LicenseStatus::Active);
        assert_eq!(
            check(&license, attempt("example.com", None)),
            Decision::Deny(Denial::Expired)
        );
    }

    #[test]
    fn product_mismatch_is_checked_first() {
        let mut license = license();
        license.status = LicenseStatus::Inactive;
        let other = ProductRef::External("99".into());
        let mut a = attempt("example.com", None);
        a.product = Some(&other);
        assert_eq!(check(&license, a), Decision::Deny(Denial::ProductMismatch));
    }

    #[test]
    fn email_must_match_when_required() {
        let mut license = license();
        license.flags = ValidationFlags {
            require_email_match: true,
            require_domain_whitelist: false,
        };

        assert_eq!(
            check(&license, attempt("example.com", Some("intruder@example.com"))),
            Decision::Deny(Denial::EmailMismatch)
        );
        assert_eq!(
            check(&license, attempt("example.com", None)),
            Decision::Deny(Denial::EmailMismatch)
        );
        assert!(check(&license, attempt("example.com", Some("owner@example.com"))).is_allowed());
    }

    #[test]
    fn email_is_ignored_when_not_required() {
        let license = license();
        assert!(check(&license, attempt("example.com", Some("someone@else.com"))).is_allowed());
    }

    #[test]
    fn whitelist_is_enforced_after_normalization() {
        let mut license = license();
        license.flags.require_domain_whitelist = true;
        license.allowed_domains.insert("https://www.Example.com/".into());

        assert!(check(&license, attempt("example.com", None)).is_allowed());
        assert_eq!(
            check(&license, attempt("sub.example.com", None)),
            Decision::Deny(Denial::DomainNotAllowed)
        );
    }

    #[test]
    fn empty_whitelist_means_unrestricted() {
        let mut license = license();
        license.flags.require_domain_whitelist = true;
        assert!(license.allowed_domains.is_empty());
        assert!(check(&license, attempt("anything.test", None)).is_allowed());
    }

    #[test]
    fn already_activated_domain_is_allowed_at_the_limit() {
        let mut license = license();
        license.activated_domains.insert("a.com".into());
        license.activated_domains.insert("b.com".into());

        assert_eq!(
            check(&license, attempt("a.com", None)),
            Decision::Allow {
                already_active: true
            }
        );
        assert_eq!(
            check(&license, attempt("c.com", None)),
            Decision::Deny(Denial::LimitReached)
        );
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let mut license = license();
        license.activation_limit = 0;
        for i in 0..100 {
            license.activated_domains.insert(format!("site{i}.com"));
        }
        assert_eq!(
            check(&license, attempt("one-more.com", None)),
            Decision::Allow {
                already_active: false
            }
        );
    }

    #[test]
    fn denial_converts_to_matching_error() {
        assert_eq!(LicenseError::from(Denial::LimitReached), LicenseError::LimitReached);
        assert_eq!(LicenseError::from(Denial::Expired), LicenseError::Expired);
    }
}
