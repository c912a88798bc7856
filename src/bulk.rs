//! Administrative operations over many licenses.
//!
//! Each item is processed on its own: a failure is recorded in the
//! [`BatchResult`] and the loop moves on. Mutations of one key take the same
//! per-key guard as the activation engine.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::audit::{emit, AuditEvent, AuditEventType, AuditSink};
use crate::config::ActivationConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::license_key::KeyGenerator;
use crate::locks::KeyLocks;
use crate::model::{
    today, BatchFailure, BatchResult, DeleteMode, Expiry, License, LicenseFilter, LicenseStatus,
    LicenseUpdate, ProductRef, ValidationFlags,
};
use crate::notify::{send, Notification, NotificationSink};
use crate::store::LicenseStore;

/// Largest batch `bulk_create` accepts.
pub const MAX_BULK_CREATE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Days,
    Months,
    Years,
}

/// A calendar period such as "3 months".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub amount: u32,
    pub unit: PeriodUnit,
}

impl Period {
    pub fn new(amount: u32, unit: PeriodUnit) -> Self {
        Self { amount, unit }
    }

    /// `date` moved forward by this period. Month arithmetic clamps to the
    /// last day of the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn add_to(&self, date: NaiveDate) -> LicenseResult<NaiveDate> {
        let shifted = match self.unit {
            PeriodUnit::Days => date.checked_add_days(Days::new(u64::from(self.amount))),
            PeriodUnit::Months => date.checked_add_months(Months::new(self.amount)),
            PeriodUnit::Years => self
                .amount
                .checked_mul(12)
                .and_then(|months| date.checked_add_months(Months::new(months))),
        };
        shifted.ok_or_else(|| {
            LicenseError::InvalidRequest(format!(
                "extending {date} by {} {:?} overflows the calendar",
                self.amount, self.unit
            ))
        })
    }
}

/// A change applied to every selected license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Setting `inactive` also frees every activation slot.
    SetStatus { status: LicenseStatus },
    SetExpiry { expiry: Expiry },
    /// Extends from the current dated expiry, or from today for lifetime licenses.
    ExtendExpiry { amount: u32, unit: PeriodUnit },
    SetActivationLimit { limit: u32 },
    ChangeProduct { product: ProductRef },
    TransferCustomer { email: String },
    Delete { mode: DeleteMode },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SetStatus { .. } => "set_status",
            Mutation::SetExpiry { .. } => "set_expiry",
            Mutation::ExtendExpiry { .. } => "extend_expiry",
            Mutation::SetActivationLimit { .. } => "set_activation_limit",
            Mutation::ChangeProduct { .. } => "change_product",
            Mutation::TransferCustomer { .. } => "transfer_customer",
            Mutation::Delete { .. } => "delete",
        }
    }

    fn validate(&self) -> LicenseResult<()> {
        match self {
            Mutation::ExtendExpiry { amount: 0, .. } => Err(LicenseError::InvalidRequest(
                "extension amount must be at least 1".to_string(),
            )),
            Mutation::TransferCustomer { email } if email.trim().is_empty() => Err(
                LicenseError::InvalidRequest("customer email must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// How long a newly created license runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Term {
    #[default]
    Lifetime,
    Until { date: NaiveDate },
    /// Counted from the creation day.
    For { amount: u32, unit: PeriodUnit },
}

impl Term {
    fn expiry(&self, today: NaiveDate) -> LicenseResult<Expiry> {
        match *self {
            Term::Lifetime => Ok(Expiry::Lifetime),
            Term::Until { date } => Ok(Expiry::On(date)),
            Term::For { amount, unit } => Period::new(amount, unit).add_to(today).map(Expiry::On),
        }
    }
}

/// Shape of licenses produced by `create_license` and `bulk_create`.
///
/// Unset limit and flags fall back to the configured activation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseTemplate {
    pub product: ProductRef,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default = "default_status")]
    pub status: LicenseStatus,
    #[serde(default)]
    pub term: Term,
    #[serde(default)]
    pub activation_limit: Option<u32>,
    #[serde(default)]
    pub flags: Option<ValidationFlags>,
    #[serde(default)]
    pub allowed_domains: BTreeSet<String>,
}

fn default_status() -> LicenseStatus {
    LicenseStatus::Active
}

impl LicenseTemplate {
    pub fn new(product: ProductRef) -> Self {
        Self {
            product,
            customer_email: None,
            status: LicenseStatus::Active,
            term: Term::Lifetime,
            activation_limit: None,
            flags: None,
            allowed_domains: BTreeSet::new(),
        }
    }

    pub fn customer(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn term(mut self, term: Term) -> Self {
        self.term = term;
        self
    }

    pub fn activation_limit(mut self, limit: u32) -> Self {
        self.activation_limit = Some(limit);
        self
    }

    pub fn flags(mut self, flags: ValidationFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    fn customer_email(&self) -> Option<String> {
        self.customer_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkCreateResult {
    pub created: Vec<License>,
    pub error_count: usize,
    /// Failures keyed by `#n`, the 1-based position in the batch.
    pub errors: Vec<BatchFailure>,
}

impl BulkCreateResult {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }
}

pub struct BulkOperationCoordinator {
    store: Arc<dyn LicenseStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    locks: Arc<KeyLocks>,
    keys: KeyGenerator,
    defaults: ActivationConfig,
}

impl BulkOperationCoordinator {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        locks: Arc<KeyLocks>,
        keys: KeyGenerator,
        defaults: ActivationConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            locks,
            keys,
            defaults,
        }
    }

    /// Apply `mutation` to every license matching `filter`, in key order.
    #[instrument(skip(self, filter), fields(operation = mutation.name()))]
    pub async fn apply(
        &self,
        filter: &LicenseFilter,
        mutation: Mutation,
    ) -> LicenseResult<BatchResult> {
        mutation.validate()?;
        let keys: Vec<String> = self
            .store
            .find(filter)
            .await?
            .into_iter()
            .map(|license| license.key)
            .collect();
        Ok(self.run(&keys, &mutation).await)
    }

    /// Apply `mutation` to an explicit selection. Unknown keys are recorded as `NotFound`.
    #[instrument(skip(self, keys), fields(operation = mutation.name(), keys = keys.len()))]
    pub async fn apply_to_keys(
        &self,
        keys: &[String],
        mutation: Mutation,
    ) -> LicenseResult<BatchResult> {
        mutation.validate()?;
        Ok(self.run(keys, &mutation).await)
    }

    async fn run(&self, keys: &[String], mutation: &Mutation) -> BatchResult {
        let mut result = BatchResult::default();
        for key in keys {
            match self.apply_one(key, mutation).await {
                Ok(()) => result.record_success(),
                Err(e) => result.record_failure(key, e),
            }
        }
        info!(
            operation = mutation.name(),
            updated = result.updated_count,
            failed = result.error_count,
            "Bulk operation finished"
        );
        result
    }

    async fn apply_one(&self, key: &str, mutation: &Mutation) -> LicenseResult<()> {
        let _guard = self.locks.lock(key).await;

        let license = match mutation {
            // Trashed licenses can still be purged.
            Mutation::Delete { .. } => None,
            _ => Some(
                self.store
                    .get(key)
                    .await?
                    .ok_or_else(|| LicenseError::NotFound(key.to_string()))?,
            ),
        };

        let (before, after) = match (mutation, license) {
            (Mutation::Delete { mode }, _) => {
                if !self.store.delete(key, *mode).await? {
                    return Err(LicenseError::NotFound(key.to_string()));
                }
                (serde_json::Value::Null, serde_json::json!(mode))
            }
            (_, None) => return Err(LicenseError::NotFound(key.to_string())),
            (Mutation::SetStatus { status }, Some(license)) => {
                let update = match status {
                    LicenseStatus::Inactive => LicenseUpdate::revoke_all_activations(),
                    other => LicenseUpdate::default().status(*other),
                };
                let updated = self.store.update(key, update).await?;
                (
                    serde_json::json!(license.status),
                    serde_json::json!(updated.status),
                )
            }
            (Mutation::SetExpiry { expiry }, Some(license)) => {
                let update = LicenseUpdate::default()
                    .expiry(*expiry)
                    .expiry_warning_sent_at(None);
                let updated = self.store.update(key, update).await?;
                (
                    serde_json::json!(license.expiry),
                    serde_json::json!(updated.expiry),
                )
            }
            (Mutation::ExtendExpiry { amount, unit }, Some(license)) => {
                let base = license.expiry.date().unwrap_or_else(today);
                let extended = Period::new(*amount, *unit).add_to(base)?;
                let update = LicenseUpdate::default()
                    .expiry(Expiry::On(extended))
                    .expiry_warning_sent_at(None);
                let updated = self.store.update(key, update).await?;
                (
                    serde_json::json!(license.expiry),
                    serde_json::json!(updated.expiry),
                )
            }
            (Mutation::SetActivationLimit { limit }, Some(license)) => {
                // Never strand activations above the new limit; deactivate first.
                if *limit != 0 && *limit < license.activation_count() {
                    return Err(LicenseError::InvalidRequest(format!(
                        "activation limit {limit} is below the {} active domains",
                        license.activation_count()
                    )));
                }
                let updated = self
                    .store
                    .update(key, LicenseUpdate::default().activation_limit(*limit))
                    .await?;
                (
                    serde_json::json!(license.activation_limit),
                    serde_json::json!(updated.activation_limit),
                )
            }
            (Mutation::ChangeProduct { product }, Some(license)) => {
                let updated = self
                    .store
                    .update(key, LicenseUpdate::default().product(product.clone()))
                    .await?;
                (
                    serde_json::json!(license.product),
                    serde_json::json!(updated.product),
                )
            }
            (Mutation::TransferCustomer { email }, Some(license)) => {
                // Index the new owner first. Owner lookups also check the
                // license's own email, so a leftover index entry is never served.
                let email = email.trim().to_string();
                self.store.link_customer(&email, key).await?;
                let updated = match self
                    .store
                    .update(key, LicenseUpdate::default().customer_email(Some(email.clone())))
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        if license.customer_email.as_deref() != Some(email.as_str()) {
                            if let Err(unlink) = self.store.unlink_customer(&email, key).await {
                                warn!(license_key = %key, "Leftover customer index entry for {email}: {unlink}");
                            }
                        }
                        return Err(e);
                    }
                };
                if let Some(previous) = &license.customer_email {
                    if previous != &email {
                        if let Err(e) = self.store.unlink_customer(previous, key).await {
                            warn!(
                                license_key = %key,
                                "Transferred, but the old owner's index entry remains: {e}"
                            );
                        }
                    }
                }
                (
                    serde_json::json!(license.customer_email),
                    serde_json::json!(updated.customer_email),
                )
            }
        };

        emit(
            self.audit.as_ref(),
            AuditEvent::new(
                key,
                AuditEventType::BulkMutated,
                format!("License updated via bulk operation: {}", mutation.name()),
            )
            .with("operation", mutation.name())
            .with("before", before)
            .with("after", after)
            .with("bulk_operation", true),
        );
        Ok(())
    }

    /// Issue one license from `template`.
    #[instrument(skip_all, fields(product = %template.product))]
    pub async fn create_license(&self, template: &LicenseTemplate) -> LicenseResult<License> {
        let today = today();
        let expiry = template.term.expiry(today)?;
        let key = self.keys.generate_unique(self.store.as_ref()).await?;

        let mut license = License::new(key, template.product.clone());
        license.status = template.status;
        license.customer_email = template.customer_email();
        license.expiry = expiry;
        license.activation_limit = template
            .activation_limit
            .unwrap_or(self.defaults.default_activation_limit);
        license.flags = template.flags.unwrap_or(ValidationFlags {
            require_email_match: self.defaults.require_email_match,
            require_domain_whitelist: self.defaults.require_domain_whitelist,
        });
        license.allowed_domains = template.allowed_domains.clone();

        let license = self.store.create(license).await?;
        if let Some(email) = &license.customer_email {
            if let Err(e) = self.store.link_customer(email, &license.key).await {
                // Undo the insert so a failed create leaves nothing behind.
                if let Err(rollback) = self.store.delete(&license.key, DeleteMode::Hard).await {
                    error!(
                        license_key = %license.key,
                        "License stored without its customer index entry: {rollback}"
                    );
                }
                return Err(e);
            }
        }

        emit(
            self.audit.as_ref(),
            AuditEvent::new(&license.key, AuditEventType::KeyGenerated, "License created")
                .with("product", &license.product)
                .with("customer_email", &license.customer_email),
        );
        send(self.notifier.as_ref(), Notification::created(&license));
        Ok(license)
    }

    /// Issue `count` licenses (1..=1000) from one template.
    #[instrument(skip(self, template), fields(product = %template.product))]
    pub async fn bulk_create(
        &self,
        template: &LicenseTemplate,
        count: usize,
    ) -> LicenseResult<BulkCreateResult> {
        if !(1..=MAX_BULK_CREATE).contains(&count) {
            return Err(LicenseError::InvalidRequest(format!(
                "license count must be between 1 and {MAX_BULK_CREATE}, got {count}"
            )));
        }
        // Fail fast on a template that cannot produce any license.
        template.term.expiry(today())?;

        let mut result = BulkCreateResult::default();
        for n in 1..=count {
            match self.create_license(template).await {
                Ok(license) => result.created.push(license),
                Err(error) => {
                    result.error_count += 1;
                    result.errors.push(BatchFailure {
                        key: format!("#{n}"),
                        error,
                    });
                }
            }
        }

        info!(
            created = result.created_count(),
            failed = result.error_count,
            "Bulk create finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::notify::ChannelNotifier;
    use crate::store::MemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn coordinator(store: Arc<MemoryStore>, audit: Arc<MemoryAuditLog>) -> BulkOperationCoordinator {
        let (notifier, _rx) = ChannelNotifier::new();
        BulkOperationCoordinator::new(
            store,
            audit,
            Arc::new(notifier),
            Arc::new(KeyLocks::new()),
            KeyGenerator::default(),
            ActivationConfig::default(),
        )
    }

    #[test]
    fn month_extension_clamps_to_month_end() {
        let period = Period::new(1, PeriodUnit::Months);
        assert_eq!(period.add_to(date("2026-01-31")).unwrap(), date("2026-02-28"));
        assert_eq!(
            Period::new(1, PeriodUnit::Years).add_to(date("2028-02-29")).unwrap(),
            date("2029-02-28")
        );
        assert_eq!(
            Period::new(10, PeriodUnit::Days).add_to(date("2026-12-25")).unwrap(),
            date("2027-01-04")
        );
    }

    #[test]
    fn mutations_deserialize_from_tagged_json() {
        let mutation: Mutation =
            serde_json::from_str(r#"{"type":"extend_expiry","amount":3,"unit":"months"}"#).unwrap();
        assert_eq!(
            mutation,
            Mutation::ExtendExpiry {
                amount: 3,
                unit: PeriodUnit::Months
            }
        );

        let mutation: Mutation =
            serde_json::from_str(r#"{"type":"set_expiry","expiry":"lifetime"}"#).unwrap();
        assert_eq!(
            mutation,
            Mutation::SetExpiry {
                expiry: Expiry::Lifetime
            }
        );
    }

    #[tokio::test]
    async fn zero_extension_is_rejected_up_front() {
        let store = Arc::new(MemoryStore::new());
        let bulk = coordinator(store, Arc::new(MemoryAuditLog::default()));
        let err = bulk
            .apply(
                &LicenseFilter::all(),
                Mutation::ExtendExpiry {
                    amount: 0,
                    unit: PeriodUnit::Days,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LicenseError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn set_inactive_frees_activations() {
        let store = Arc::new(MemoryStore::new());
        let mut license = License::new("K1", ProductRef::Internal("p".into()));
        license.activated_domains.insert("a.com".into());
        store.create(license).await.unwrap();

        let bulk = coordinator(store.clone(), Arc::new(MemoryAuditLog::default()));
        let result = bulk
            .apply_to_keys(
                &["K1".to_string()],
                Mutation::SetStatus {
                    status: LicenseStatus::Inactive,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.updated_count, 1);
        let stored = store.get("K1").await.unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Inactive);
        assert!(stored.activated_domains.is_empty());
    }

    #[tokio::test]
    async fn audit_entries_carry_before_and_after() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(License::new("K1", ProductRef::Internal("p".into())))
            .await
            .unwrap();
        let audit = Arc::new(MemoryAuditLog::default());
        let bulk = coordinator(store, audit.clone());

        bulk.apply_to_keys(&["K1".to_string()], Mutation::SetActivationLimit { limit: 5 })
            .await
            .unwrap();

        let events = audit.of_type(AuditEventType::BulkMutated);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context["before"], 1);
        assert_eq!(events[0].context["after"], 5);
        assert_eq!(events[0].context["bulk_operation"], true);
    }

    #[tokio::test]
    async fn bulk_create_rejects_out_of_range_counts() {
        let store = Arc::new(MemoryStore::new());
        let bulk = coordinator(store.clone(), Arc::new(MemoryAuditLog::default()));
        let template = LicenseTemplate::new(ProductRef::Internal("p".into()));

        assert!(bulk.bulk_create(&template, 0).await.is_err());
        assert!(bulk.bulk_create(&template, MAX_BULK_CREATE + 1).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn created_license_uses_configured_defaults() {
        let store = Arc::new(MemoryStore::new());
        let bulk = coordinator(store, Arc::new(MemoryAuditLog::default()));
        let template = LicenseTemplate::new(ProductRef::External("42".into()))
            .customer("  buyer@example.com ")
            .term(Term::For {
                amount: 1,
                unit: PeriodUnit::Years,
            });

        let license = bulk.create_license(&template).await.unwrap();
        assert_eq!(license.activation_limit, 1);
        assert_eq!(license.customer_email.as_deref(), Some("buyer@example.com"));
        assert!(matches!(license.expiry, Expiry::On(_)));
    }
}
