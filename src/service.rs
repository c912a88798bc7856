//! [`Licensor`] wires the store, policy, sinks and key generator into one
//! engine and one bulk coordinator that share a single set of key locks.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use licensor::{Licensor, MemoryStore};
//!
//! let licensor = Licensor::builder(Arc::new(MemoryStore::new())).build();
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::activation::{
    ActivationEngine, ActivationOutcome, ActivationRequest, ProductInfo, ValidationReport,
};
use crate::audit::{emit, AuditEvent, AuditEventType, AuditSink, TracingAuditSink};
use crate::bulk::{BulkCreateResult, BulkOperationCoordinator, LicenseTemplate, Mutation};
use crate::config::{ActivationConfig, LicensorConfig};
use crate::errors::{LicenseError, LicenseResult};
use crate::license_key::{KeyGenerator, LicenseKeyConfig};
use crate::locks::KeyLocks;
use crate::model::{BatchResult, License, LicenseFilter, LicenseStatus, LicenseUpdate, ProductRef};
use crate::notify::{NotificationSink, TracingNotifier};
use crate::policy::{ActivationPolicy, ValidationPolicy};
use crate::store::LicenseStore;

pub struct Licensor {
    store: Arc<dyn LicenseStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    locks: Arc<KeyLocks>,
    engine: ActivationEngine,
    bulk: BulkOperationCoordinator,
}

pub struct LicensorBuilder {
    store: Arc<dyn LicenseStore>,
    policy: Arc<dyn ActivationPolicy>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    keys: LicenseKeyConfig,
    defaults: ActivationConfig,
}

impl LicensorBuilder {
    pub fn policy(mut self, policy: Arc<dyn ActivationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn key_config(mut self, keys: LicenseKeyConfig) -> Self {
        self.keys = keys;
        self
    }

    pub fn activation_defaults(mut self, defaults: ActivationConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Take key layout and activation defaults from a loaded configuration.
    pub fn config(self, config: &LicensorConfig) -> Self {
        self.key_config(LicenseKeyConfig::from(&config.license))
            .activation_defaults(config.activation.clone())
    }

    pub fn build(self) -> Licensor {
        let locks = Arc::new(KeyLocks::new());
        let engine = ActivationEngine::with_policy(
            self.store.clone(),
            self.policy,
            self.audit.clone(),
            locks.clone(),
        );
        let bulk = BulkOperationCoordinator::new(
            self.store.clone(),
            self.audit.clone(),
            self.notifier.clone(),
            locks.clone(),
            KeyGenerator::new(self.keys),
            self.defaults,
        );
        Licensor {
            store: self.store,
            audit: self.audit,
            notifier: self.notifier,
            locks,
            engine,
            bulk,
        }
    }
}

impl Licensor {
    /// Defaults: [`ValidationPolicy`], tracing audit sink and notifier.
    pub fn builder(store: Arc<dyn LicenseStore>) -> LicensorBuilder {
        LicensorBuilder {
            store,
            policy: Arc::new(ValidationPolicy::new()),
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotifier),
            keys: LicenseKeyConfig::default(),
            defaults: ActivationConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LicenseStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notifier
    }

    pub fn engine(&self) -> &ActivationEngine {
        &self.engine
    }

    pub fn bulk(&self) -> &BulkOperationCoordinator {
        &self.bulk
    }

    pub async fn activate(&self, request: ActivationRequest) -> LicenseResult<ActivationOutcome> {
        self.engine.activate(request).await
    }

    pub async fn deactivate(&self, key: &str, domain: &str) -> LicenseResult<()> {
        self.engine.deactivate(key, domain).await
    }

    pub async fn force_deactivate_all(&self, keys: &[String]) -> BatchResult {
        self.engine.force_deactivate_all(keys).await
    }

    pub async fn validate(
        &self,
        key: &str,
        product: Option<&ProductRef>,
        domain: Option<&str>,
    ) -> LicenseResult<ValidationReport> {
        self.engine.validate(key, product, domain).await
    }

    pub async fn product_info(
        &self,
        key: &str,
        product: Option<&ProductRef>,
    ) -> LicenseResult<ProductInfo> {
        self.engine.product_info(key, product).await
    }

    pub async fn create_license(&self, template: &LicenseTemplate) -> LicenseResult<License> {
        self.bulk.create_license(template).await
    }

    pub async fn bulk_create(
        &self,
        template: &LicenseTemplate,
        count: usize,
    ) -> LicenseResult<BulkCreateResult> {
        self.bulk.bulk_create(template, count).await
    }

    pub async fn apply(&self, filter: &LicenseFilter, mutation: Mutation) -> LicenseResult<BatchResult> {
        self.bulk.apply(filter, mutation).await
    }

    pub async fn apply_to_keys(
        &self,
        keys: &[String],
        mutation: Mutation,
    ) -> LicenseResult<BatchResult> {
        self.bulk.apply_to_keys(keys, mutation).await
    }

    pub async fn license(&self, key: &str) -> LicenseResult<License> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))
    }

    pub async fn find(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        self.store.find(filter).await
    }

    /// Live licenses recorded for a customer.
    pub async fn customer_licenses(&self, email: &str) -> LicenseResult<Vec<License>> {
        let keys = self.store.customer_licenses(email).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .find(&LicenseFilter::all().with_keys(keys).with_customer(email))
            .await
    }

    /// Bring a trashed license back.
    pub async fn restore(&self, key: &str) -> LicenseResult<()> {
        if self.store.restore(key).await? {
            emit(
                self.audit.as_ref(),
                AuditEvent::new(key, AuditEventType::Restored, "License restored from trash"),
            );
            Ok(())
        } else {
            Err(LicenseError::NotFound(key.to_string()))
        }
    }

    /// Persist `expired` on a license still stored as active after its expiry day.
    ///
    /// Runs under the key's lock on a fresh read, so a renewal that landed
    /// after the caller selected the key is kept. Returns the rewritten license.
    pub async fn reconcile_expiry(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> LicenseResult<Option<License>> {
        let _guard = self.locks.lock(key).await;
        let Some(license) = self.store.get(key).await? else {
            return Ok(None);
        };
        if license.status != LicenseStatus::Active || !license.expiry.is_past(today) {
            return Ok(None);
        }

        let updated = self
            .store
            .update(key, LicenseUpdate::default().status(LicenseStatus::Expired))
            .await?;
        emit(
            self.audit.as_ref(),
            AuditEvent::new(key, AuditEventType::Expired, "License expired")
                .with("expiry", updated.expiry),
        );
        Ok(Some(updated))
    }

    /// Record that the expiry warning for `key` is being sent.
    ///
    /// Same locking as [`Licensor::reconcile_expiry`]. Yields the license and
    /// its expiry date only when it is active, not yet warned and expiring
    /// within `today..=horizon`.
    pub async fn claim_expiry_warning(
        &self,
        key: &str,
        today: NaiveDate,
        horizon: NaiveDate,
    ) -> LicenseResult<Option<(License, NaiveDate)>> {
        let _guard = self.locks.lock(key).await;
        let Some(license) = self.store.get(key).await? else {
            return Ok(None);
        };
        let Some(expires_on) = license.expiry.date() else {
            return Ok(None);
        };
        if license.effective_status(today) != LicenseStatus::Active
            || license.expiry_warning_sent_at.is_some()
            || expires_on < today
            || expires_on > horizon
        {
            return Ok(None);
        }

        let updated = self
            .store
            .update(
                key,
                LicenseUpdate::default().expiry_warning_sent_at(Some(Utc::now().naive_utc())),
            )
            .await?;
        Ok(Some((updated, expires_on)))
    }
}
