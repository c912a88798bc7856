//! Activation engine: binds license keys to consumer domains.
//!
//! Every mutating call takes the key's guard from [`KeyLocks`] before it loads
//! the license and releases it after the store update, so concurrent
//! activations of one key cannot lose each other's domains.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::audit::{emit, AuditEvent, AuditEventType, AuditSink};
use crate::errors::{LicenseError, LicenseResult};
use crate::locks::KeyLocks;
use crate::model::{
    today, BatchResult, Expiry, License, LicenseStatus, LicenseUpdate, ProductRef, Slots,
};
use crate::policy::{
    normalize_domain, ActivationAttempt, ActivationPolicy, Decision, ValidationPolicy,
};
use crate::store::LicenseStore;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActivationRequest {
    pub key: String,
    #[serde(default)]
    pub email: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub site_data: Option<serde_json::Value>,
}

impl ActivationRequest {
    pub fn new(key: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn product(mut self, product: ProductRef) -> Self {
        self.product = Some(product);
        self
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn site_data(mut self, site_data: serde_json::Value) -> Self {
        self.site_data = Some(site_data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationOutcome {
    pub key: String,
    /// Normalized form of the requested domain.
    pub domain: String,
    pub activation_count: u32,
    pub activation_limit: u32,
    pub remaining: Slots,
    pub expiry: Expiry,
    /// False when the domain already held a slot.
    pub newly_activated: bool,
}

impl ActivationOutcome {
    fn from_license(license: &License, domain: String, newly_activated: bool) -> Self {
        Self {
            key: license.key.clone(),
            domain,
            activation_count: license.activation_count(),
            activation_limit: license.activation_limit,
            remaining: license.remaining_slots(),
            expiry: license.expiry,
            newly_activated,
        }
    }
}

/// A successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub key: String,
    pub status: LicenseStatus,
    pub product: ProductRef,
    pub expiry: Expiry,
    pub activation_count: u32,
    pub activation_limit: u32,
    pub remaining: Slots,
}

/// Update metadata for the product behind a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductInfo {
    pub product: ProductRef,
    pub title: String,
    pub version: String,
    pub download_url: Option<String>,
}

pub struct ActivationEngine {
    store: Arc<dyn LicenseStore>,
    policy: Arc<dyn ActivationPolicy>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<KeyLocks>,
}

impl ActivationEngine {
    /// Engine using the default [`ValidationPolicy`].
    pub fn new(store: Arc<dyn LicenseStore>, audit: Arc<dyn AuditSink>, locks: Arc<KeyLocks>) -> Self {
        Self::with_policy(store, Arc::new(ValidationPolicy::new()), audit, locks)
    }

    pub fn with_policy(
        store: Arc<dyn LicenseStore>,
        policy: Arc<dyn ActivationPolicy>,
        audit: Arc<dyn AuditSink>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            store,
            policy,
            audit,
            locks,
        }
    }

    /// Bind `request.domain` to the license, consuming a slot if the domain is new.
    #[instrument(skip_all, fields(license_key = %request.key))]
    pub async fn activate(&self, request: ActivationRequest) -> LicenseResult<ActivationOutcome> {
        let domain = normalize_domain(&request.domain);
        if domain.is_empty() {
            return Err(LicenseError::InvalidRequest(
                "domain is required for activation".to_string(),
            ));
        }

        let _guard = self.locks.lock(&request.key).await;

        let license = self
            .store
            .get(&request.key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(request.key.clone()))?;

        let attempt = ActivationAttempt {
            email: request.email.as_deref(),
            domain: &domain,
            product: request.product.as_ref(),
            today: today(),
        };

        match self.policy.check_activation(&license, &attempt) {
            Decision::Deny(denial) => {
                let error = LicenseError::from(denial);
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        &license.key,
                        AuditEventType::ActivationDenied,
                        format!("Activation on {domain} denied: {error}"),
                    )
                    .with("domain", &domain)
                    .with("reason", denial),
                );
                Err(error)
            }
            Decision::Allow {
                already_active: true,
            } => {
                let license = match request.fingerprint {
                    Some(fingerprint)
                        if license.fingerprints.get(&domain) != Some(&fingerprint) =>
                    {
                        let mut fingerprints = license.fingerprints.clone();
                        fingerprints.insert(domain.clone(), fingerprint);
                        self.store
                            .update(&license.key, LicenseUpdate::default().fingerprints(fingerprints))
                            .await?
                    }
                    _ => license,
                };
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        &license.key,
                        AuditEventType::AlreadyActive,
                        format!("License already active on {domain}"),
                    )
                    .with("domain", &domain),
                );
                Ok(ActivationOutcome::from_license(&license, domain, false))
            }
            Decision::Allow {
                already_active: false,
            } => {
                let mut domains = license.activated_domains.clone();
                domains.insert(domain.clone());
                let mut update = LicenseUpdate::default().activated_domains(domains);
                if let Some(fingerprint) = request.fingerprint {
                    let mut fingerprints = license.fingerprints.clone();
                    fingerprints.insert(domain.clone(), fingerprint);
                    update = update.fingerprints(fingerprints);
                }
                if let Some(site_data) = request.site_data {
                    let mut all_site_data = license.site_data.clone();
                    all_site_data.insert(domain.clone(), site_data);
                    update = update.site_data(all_site_data);
                }

                let license = self.store.update(&license.key, update).await?;
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        &license.key,
                        AuditEventType::Activated,
                        format!("License activated on {domain}"),
                    )
                    .with("domain", &domain)
                    .with("activation_count", license.activation_count()),
                );
                Ok(ActivationOutcome::from_license(&license, domain, true))
            }
        }
    }

    /// Release the slot held by `domain`. Releasing an inactive domain is a no-op.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, key: &str, domain: &str) -> LicenseResult<()> {
        let domain = normalize_domain(domain);
        let _guard = self.locks.lock(key).await;

        let license = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;

        if !license.activated_domains.contains(&domain) {
            debug!(domain = %domain, "Domain not activated; nothing to release");
            return Ok(());
        }

        let mut domains = license.activated_domains.clone();
        let mut fingerprints = license.fingerprints.clone();
        let mut site_data = license.site_data.clone();
        domains.remove(&domain);
        fingerprints.remove(&domain);
        site_data.remove(&domain);

        self.store
            .update(
                key,
                LicenseUpdate::default()
                    .activated_domains(domains)
                    .fingerprints(fingerprints)
                    .site_data(site_data),
            )
            .await?;

        emit(
            self.audit.as_ref(),
            AuditEvent::new(
                key,
                AuditEventType::Deactivated,
                format!("License deactivated on {domain}"),
            )
            .with("domain", &domain),
        );
        Ok(())
    }

    /// Emergency revocation: clear every activation and set each license inactive.
    ///
    /// Each key is handled independently; a failure is recorded and the loop
    /// continues.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn force_deactivate_all(&self, keys: &[String]) -> BatchResult {
        let mut result = BatchResult::default();

        for key in keys {
            let _guard = self.locks.lock(key).await;
            match self
                .store
                .update(key, LicenseUpdate::revoke_all_activations())
                .await
            {
                Ok(_) => {
                    result.record_success();
                    emit(
                        self.audit.as_ref(),
                        AuditEvent::new(
                            key,
                            AuditEventType::ForceDeactivated,
                            "All activations revoked",
                        ),
                    );
                }
                Err(e) => result.record_failure(key, e),
            }
        }

        result
    }

    /// Check that a license is usable, optionally for a product and an activated domain.
    ///
    /// When a domain is given and the license is limited, the domain must hold
    /// an activation slot.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        key: &str,
        product: Option<&ProductRef>,
        domain: Option<&str>,
    ) -> LicenseResult<ValidationReport> {
        let license = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;
        let today = today();

        let outcome = ValidationPolicy::check_standing(&license, product, today)
            .map_err(LicenseError::from)
            .and_then(|()| match domain.map(normalize_domain) {
                Some(domain)
                    if !domain.is_empty()
                        && !license.is_unlimited()
                        && !license.activated_domains.contains(&domain) =>
                {
                    Err(LicenseError::DomainNotAllowed)
                }
                _ => Ok(()),
            });

        match outcome {
            Ok(()) => {
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(key, AuditEventType::Validated, "License validated")
                        .with("domain", domain),
                );
                Ok(ValidationReport {
                    key: license.key.clone(),
                    status: license.effective_status(today),
                    product: license.product.clone(),
                    expiry: license.expiry,
                    activation_count: license.activation_count(),
                    activation_limit: license.activation_limit,
                    remaining: license.remaining_slots(),
                })
            }
            Err(e) => {
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        key,
                        AuditEventType::ValidationFailed,
                        format!("License validation failed: {e}"),
                    )
                    .with("domain", domain)
                    .with("reason", e.kind()),
                );
                Err(e)
            }
        }
    }

    /// Version and download location of the product a valid license covers.
    pub async fn product_info(
        &self,
        key: &str,
        product: Option<&ProductRef>,
    ) -> LicenseResult<ProductInfo> {
        let license = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;
        ValidationPolicy::check_standing(&license, product, today())?;

        let product = self
            .store
            .get_product(&license.product)
            .await?
            .ok_or_else(|| LicenseError::NotFound(license.product.to_string()))?;

        Ok(ProductInfo {
            product: product.product,
            title: product.title,
            version: product.version,
            download_url: product.download_url,
        })
    }
}
