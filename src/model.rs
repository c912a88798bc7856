//! Domain model: licenses, products and the value types around them.
//!
//! Product references and expiries are sum types. Their string forms
//! (`internal|42`, `external|1337`, `lifetime`, `2026-12-31`) only exist at the
//! storage and HTTP boundaries.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::errors::LicenseError;

/// Stored license status.
///
/// The stored value may be stale: an `Active` license whose expiry has passed
/// is *effectively* expired. Use [`License::effective_status`] for decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LicenseStatus::Active),
            "inactive" => Ok(LicenseStatus::Inactive),
            "expired" => Ok(LicenseStatus::Expired),
            other => Err(LicenseError::InvalidRequest(format!(
                "unknown license status '{other}'"
            ))),
        }
    }
}

/// Reference to the product a license was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProductRef {
    /// Product from the vendor's own catalog.
    Internal(String),
    /// Product owned by an external commerce system.
    External(String),
}

impl ProductRef {
    pub fn id(&self) -> &str {
        match self {
            ProductRef::Internal(id) | ProductRef::External(id) => id,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            ProductRef::Internal(_) => "internal",
            ProductRef::External(_) => "external",
        }
    }
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.source(), self.id())
    }
}

impl FromStr for ProductRef {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s.split_once('|').ok_or_else(|| {
            LicenseError::InvalidRequest(format!(
                "invalid product reference '{s}' (expected: internal|ID or external|ID)"
            ))
        })?;

        if id.trim().is_empty() {
            return Err(LicenseError::InvalidRequest(
                "product reference has an empty id".to_string(),
            ));
        }

        match source {
            "internal" => Ok(ProductRef::Internal(id.to_string())),
            "external" => Ok(ProductRef::External(id.to_string())),
            other => Err(LicenseError::InvalidRequest(format!(
                "unknown product source '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ProductRef {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProductRef> for String {
    fn from(value: ProductRef) -> Self {
        value.to_string()
    }
}

/// License expiry: a calendar date or the lifetime sentinel.
///
/// A dated license is valid through the end of its expiry day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expiry {
    Lifetime,
    On(NaiveDate),
}

impl Expiry {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Expiry::Lifetime => None,
            Expiry::On(date) => Some(*date),
        }
    }

    /// True when the expiry day lies strictly before `today`.
    pub fn is_past(&self, today: NaiveDate) -> bool {
        matches!(self, Expiry::On(date) if *date < today)
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Lifetime => f.write_str("lifetime"),
            Expiry::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl FromStr for Expiry {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("lifetime") {
            return Ok(Expiry::Lifetime);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Expiry::On)
            .map_err(|_| {
                LicenseError::InvalidRequest(format!(
                    "invalid expiry '{trimmed}' (expected: YYYY-MM-DD or 'lifetime')"
                ))
            })
    }
}

impl TryFrom<String> for Expiry {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Expiry> for String {
    fn from(value: Expiry) -> Self {
        value.to_string()
    }
}

/// Per-license activation rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFlags {
    /// Activation requests must carry the customer email on file.
    #[serde(default)]
    pub require_email_match: bool,
    /// Activation is restricted to the allowed-domain whitelist (when non-empty).
    #[serde(default)]
    pub require_domain_whitelist: bool,
}

/// Remaining activation capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slots {
    Unlimited,
    Limited(u32),
}

/// A single issued license key plus its entitlement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub status: LicenseStatus,
    pub product: ProductRef,
    pub customer_email: Option<String>,
    pub expiry: Expiry,
    /// Maximum number of activated domains; 0 means unlimited.
    pub activation_limit: u32,
    pub activated_domains: BTreeSet<String>,
    /// Domain → opaque install identifier.
    pub fingerprints: BTreeMap<String, String>,
    /// Domain → data reported by the activating site.
    pub site_data: BTreeMap<String, serde_json::Value>,
    pub flags: ValidationFlags,
    pub allowed_domains: BTreeSet<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub trashed_at: Option<NaiveDateTime>,
    pub expiry_warning_sent_at: Option<NaiveDateTime>,
    /// Bumped by every successful update.
    pub version: u64,
}

impl License {
    /// A fresh active lifetime license with a single activation slot.
    pub fn new(key: impl Into<String>, product: ProductRef) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            key: key.into(),
            status: LicenseStatus::Active,
            product,
            customer_email: None,
            expiry: Expiry::Lifetime,
            activation_limit: 1,
            activated_domains: BTreeSet::new(),
            fingerprints: BTreeMap::new(),
            site_data: BTreeMap::new(),
            flags: ValidationFlags::default(),
            allowed_domains: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            trashed_at: None,
            expiry_warning_sent_at: None,
            version: 0,
        }
    }

    /// Status with time-driven expiry applied.
    pub fn effective_status(&self, today: NaiveDate) -> LicenseStatus {
        if self.status == LicenseStatus::Active && self.expiry.is_past(today) {
            LicenseStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry.is_past(today)
    }

    pub fn is_unlimited(&self) -> bool {
        self.activation_limit == 0
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }

    pub fn activation_count(&self) -> u32 {
        self.activated_domains.len() as u32
    }

    pub fn remaining_slots(&self) -> Slots {
        if self.is_unlimited() {
            Slots::Unlimited
        } else {
            Slots::Limited(self.activation_limit.saturating_sub(self.activation_count()))
        }
    }
}

/// Catalog entry for a licensed product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product: ProductRef,
    pub title: String,
    pub version: String,
    pub download_url: Option<String>,
}

impl Product {
    pub fn new(product: ProductRef, title: impl Into<String>) -> Self {
        Self {
            product,
            title: title.into(),
            version: "1.0.0".to_string(),
            download_url: None,
        }
    }
}

/// Partial update applied atomically to one license by a store.
///
/// `None` leaves a field untouched. Nested options (`customer_email`,
/// `expiry_warning_sent_at`) distinguish "leave" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LicenseUpdate {
    pub status: Option<LicenseStatus>,
    pub product: Option<ProductRef>,
    pub customer_email: Option<Option<String>>,
    pub expiry: Option<Expiry>,
    pub activation_limit: Option<u32>,
    pub activated_domains: Option<BTreeSet<String>>,
    pub fingerprints: Option<BTreeMap<String, String>>,
    pub site_data: Option<BTreeMap<String, serde_json::Value>>,
    pub flags: Option<ValidationFlags>,
    pub allowed_domains: Option<BTreeSet<String>>,
    pub expiry_warning_sent_at: Option<Option<NaiveDateTime>>,
}

impl LicenseUpdate {
    pub fn status(mut self, status: LicenseStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn product(mut self, product: ProductRef) -> Self {
        self.product = Some(product);
        self
    }

    pub fn customer_email(mut self, email: Option<String>) -> Self {
        self.customer_email = Some(email);
        self
    }

    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn activation_limit(mut self, limit: u32) -> Self {
        self.activation_limit = Some(limit);
        self
    }

    pub fn activated_domains(mut self, domains: BTreeSet<String>) -> Self {
        self.activated_domains = Some(domains);
        self
    }

    pub fn fingerprints(mut self, fingerprints: BTreeMap<String, String>) -> Self {
        self.fingerprints = Some(fingerprints);
        self
    }

    pub fn site_data(mut self, site_data: BTreeMap<String, serde_json::Value>) -> Self {
        self.site_data = Some(site_data);
        self
    }

    pub fn flags(mut self, flags: ValidationFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn allowed_domains(mut self, domains: BTreeSet<String>) -> Self {
        self.allowed_domains = Some(domains);
        self
    }

    pub fn expiry_warning_sent_at(mut self, at: Option<NaiveDateTime>) -> Self {
        self.expiry_warning_sent_at = Some(at);
        self
    }

    /// Everything the emergency revocation path resets, in one update.
    pub fn revoke_all_activations() -> Self {
        Self::default()
            .status(LicenseStatus::Inactive)
            .activated_domains(BTreeSet::new())
            .fingerprints(BTreeMap::new())
            .site_data(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to `license`. Version and timestamps are the store's job.
    pub fn apply_to(&self, license: &mut License) {
        if let Some(status) = self.status {
            license.status = status;
        }
        if let Some(product) = &self.product {
            license.product = product.clone();
        }
        if let Some(email) = &self.customer_email {
            license.customer_email = email.clone();
        }
        if let Some(expiry) = self.expiry {
            license.expiry = expiry;
        }
        if let Some(limit) = self.activation_limit {
            license.activation_limit = limit;
        }
        if let Some(domains) = &self.activated_domains {
            license.activated_domains = domains.clone();
        }
        if let Some(fingerprints) = &self.fingerprints {
            license.fingerprints = fingerprints.clone();
        }
        if let Some(site_data) = &self.site_data {
            license.site_data = site_data.clone();
        }
        if let Some(flags) = self.flags {
            license.flags = flags;
        }
        if let Some(domains) = &self.allowed_domains {
            license.allowed_domains = domains.clone();
        }
        if let Some(at) = self.expiry_warning_sent_at {
            license.expiry_warning_sent_at = at;
        }
    }
}

/// How a license is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Move to trash; the key stays reserved and the license can be restored.
    Soft,
    /// Remove permanently.
    Hard,
}

/// Selection criteria for [`crate::store::LicenseStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseFilter {
    /// Matches the *effective* status.
    pub status: Option<LicenseStatus>,
    pub product: Option<ProductRef>,
    pub customer_email: Option<String>,
    /// Inclusive lower bound on the expiry date. Lifetime licenses never match a range.
    pub expires_after: Option<NaiveDate>,
    /// Inclusive upper bound on the expiry date.
    pub expires_before: Option<NaiveDate>,
    pub keys: Option<Vec<String>>,
    pub include_trashed: bool,
}

impl LicenseFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: LicenseStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_product(mut self, product: ProductRef) -> Self {
        self.product = Some(product);
        self
    }

    pub fn with_customer(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn expiring_between(mut self, after: NaiveDate, before: NaiveDate) -> Self {
        self.expires_after = Some(after);
        self.expires_before = Some(before);
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn including_trashed(mut self) -> Self {
        self.include_trashed = true;
        self
    }

    pub fn matches(&self, license: &License, today: NaiveDate) -> bool {
        if license.is_trashed() && !self.include_trashed {
            return false;
        }
        if let Some(status) = self.status {
            if license.effective_status(today) != status {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if &license.product != product {
                return false;
            }
        }
        if let Some(email) = &self.customer_email {
            if license.customer_email.as_deref() != Some(email.as_str()) {
                return false;
            }
        }
        if self.expires_after.is_some() || self.expires_before.is_some() {
            let Some(date) = license.expiry.date() else {
                return false;
            };
            if self.expires_after.is_some_and(|after| date < after) {
                return false;
            }
            if self.expires_before.is_some_and(|before| date > before) {
                return false;
            }
        }
        if let Some(keys) = &self.keys {
            if !keys.iter().any(|k| k == &license.key) {
                return false;
            }
        }
        true
    }
}

/// One item that failed inside a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub key: String,
    pub error: LicenseError,
}

impl Serialize for BatchFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("BatchFailure", 3)?;
        state.serialize_field("key", &self.key)?;
        state.serialize_field("code", self.error.kind())?;
        state.serialize_field("message", &self.error.to_string())?;
        state.end()
    }
}

/// Per-item accounting for operations over many licenses.
///
/// `updated_count + error_count` equals the number of items attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub updated_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn record_success(&mut self) {
        self.updated_count += 1;
    }

    pub fn record_failure(&mut self, key: impl Into<String>, error: LicenseError) {
        self.error_count += 1;
        self.errors.push(BatchFailure {
            key: key.into(),
            error,
        });
    }

    pub fn attempted(&self) -> usize {
        self.updated_count + self.error_count
    }
}

/// Today's date in UTC, the reference point for every expiry decision.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
