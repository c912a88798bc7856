//! Integration tests for activation, deactivation and validation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Days;
use rand::Rng;

use licensor::audit::{AuditEventType, MemoryAuditLog};
use licensor::model::{today, LicenseUpdate, Slots, ValidationFlags};
use licensor::{
    ActivationRequest, Expiry, License, LicenseError, LicenseStatus, LicenseStore, Licensor,
    MemoryStore, Product, ProductRef,
};

fn product() -> ProductRef {
    ProductRef::Internal("plugin-pro".to_string())
}

struct Harness {
    licensor: Arc<Licensor>,
    store: Arc<MemoryStore>,
    audit: Arc<MemoryAuditLog>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditLog::new(100));
    let licensor = Licensor::builder(store.clone()).audit(audit.clone()).build();
    Harness {
        licensor: Arc::new(licensor),
        store,
        audit,
    }
}

async fn seed(store: &MemoryStore, key: &str, limit: u32) -> License {
    let mut license = License::new(key, product());
    license.activation_limit = limit;
    license.customer_email = Some("owner@example.com".to_string());
    store.create(license).await.unwrap()
}

#[tokio::test]
async fn activation_is_idempotent_per_domain() {
    let h = harness();
    seed(&h.store, "AAAA-1111", 2).await;

    let first = h
        .licensor
        .activate(ActivationRequest::new("AAAA-1111", "https://www.Example.com/shop"))
        .await
        .unwrap();
    assert!(first.newly_activated);
    assert_eq!(first.domain, "example.com");
    assert_eq!(first.activation_count, 1);

    let second = h
        .licensor
        .activate(ActivationRequest::new("AAAA-1111", "example.com"))
        .await
        .unwrap();
    assert!(!second.newly_activated);
    assert_eq!(second.activation_count, 1);
    assert_eq!(second.remaining, Slots::Limited(1));

    assert_eq!(h.audit.of_type(AuditEventType::Activated).len(), 1);
    assert_eq!(h.audit.of_type(AuditEventType::AlreadyActive).len(), 1);
}

#[tokio::test]
async fn limit_is_enforced_for_new_domains_only() {
    let h = harness();
    seed(&h.store, "AAAA-2222", 1).await;

    h.licensor
        .activate(ActivationRequest::new("AAAA-2222", "one.com"))
        .await
        .unwrap();

    let err = h
        .licensor
        .activate(ActivationRequest::new("AAAA-2222", "two.com"))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::LimitReached);

    // The holder of the slot can still re-activate.
    h.licensor
        .activate(ActivationRequest::new("AAAA-2222", "www.one.com"))
        .await
        .unwrap();

    let denied = h.audit.of_type(AuditEventType::ActivationDenied);
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].context["reason"], "limit_reached");
}

#[tokio::test]
async fn zero_limit_means_unlimited() {
    let h = harness();
    seed(&h.store, "AAAA-3333", 0).await;

    for i in 0..25 {
        h.licensor
            .activate(ActivationRequest::new("AAAA-3333", format!("site{i}.com")))
            .await
            .unwrap();
    }

    let license = h.licensor.license("AAAA-3333").await.unwrap();
    assert_eq!(license.activation_count(), 25);
    assert_eq!(license.remaining_slots(), Slots::Unlimited);
}

#[tokio::test]
async fn activation_count_never_exceeds_limit() {
    let h = harness();
    let mut rng = rand::rng();

    for round in 0..20 {
        let key = format!("RAND-{round:04}");
        let limit = rng.random_range(1..=5u32);
        seed(&h.store, &key, limit).await;

        for _ in 0..30 {
            let domain = format!("host{}.example", rng.random_range(0..8));
            let before = h.licensor.license(&key).await.unwrap();
            let result = h
                .licensor
                .activate(ActivationRequest::new(&key, &domain))
                .await;

            match result {
                Ok(_) => {}
                Err(LicenseError::LimitReached) => {
                    assert_eq!(before.activation_count(), limit);
                    assert!(!before.activated_domains.contains(&domain));
                }
                Err(other) => panic!("unexpected error: {other}"),
            }

            let after = h.licensor.license(&key).await.unwrap();
            assert!(after.activation_count() <= limit);
        }
    }
}

#[tokio::test]
async fn concurrent_activations_respect_limit() {
    let h = harness();
    seed(&h.store, "CONC-0001", 3).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let licensor = Arc::clone(&h.licensor);
        handles.push(tokio::spawn(async move {
            licensor
                .activate(ActivationRequest::new("CONC-0001", format!("d{i}.com")))
                .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(e, LicenseError::LimitReached),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(
        h.licensor.license("CONC-0001").await.unwrap().activation_count(),
        3
    );
}

#[tokio::test]
async fn activation_rejects_blank_domain() {
    let h = harness();
    seed(&h.store, "AAAA-4444", 1).await;

    let err = h
        .licensor
        .activate(ActivationRequest::new("AAAA-4444", "https://www./"))
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::InvalidRequest(_)));
}

#[tokio::test]
async fn activation_of_unknown_key_is_not_found() {
    let h = harness();
    let err = h
        .licensor
        .activate(ActivationRequest::new("NOPE-0000", "example.com"))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::NotFound("NOPE-0000".to_string()));
}

#[tokio::test]
async fn inactive_and_expired_licenses_are_denied() {
    let h = harness();
    seed(&h.store, "INAC-0001", 1).await;
    seed(&h.store, "EXPD-0001", 1).await;

    h.store
        .update(
            "INAC-0001",
            LicenseUpdate::default().status(LicenseStatus::Inactive),
        )
        .await
        .unwrap();
    let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
    h.store
        .update("EXPD-0001", LicenseUpdate::default().expiry(Expiry::On(yesterday)))
        .await
        .unwrap();

    assert_eq!(
        h.licensor
            .activate(ActivationRequest::new("INAC-0001", "a.com"))
            .await
            .unwrap_err(),
        LicenseError::NotActive
    );
    assert_eq!(
        h.licensor
            .activate(ActivationRequest::new("EXPD-0001", "a.com"))
            .await
            .unwrap_err(),
        LicenseError::Expired
    );
}

#[tokio::test]
async fn license_expiring_today_is_still_valid() {
    let h = harness();
    seed(&h.store, "TDAY-0001", 1).await;
    h.store
        .update("TDAY-0001", LicenseUpdate::default().expiry(Expiry::On(today())))
        .await
        .unwrap();

    h.licensor
        .activate(ActivationRequest::new("TDAY-0001", "a.com"))
        .await
        .unwrap();
}

#[tokio::test]
async fn expiry_is_applied_lazily() {
    let h = harness();
    seed(&h.store, "LAZY-0001", 1).await;
    let past = today().checked_sub_days(Days::new(3)).unwrap();
    h.store
        .update("LAZY-0001", LicenseUpdate::default().expiry(Expiry::On(past)))
        .await
        .unwrap();

    let stored = h.licensor.license("LAZY-0001").await.unwrap();
    assert_eq!(stored.status, LicenseStatus::Active);
    assert_eq!(stored.effective_status(today()), LicenseStatus::Expired);

    let err = h
        .licensor
        .validate("LAZY-0001", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::Expired);
}

#[tokio::test]
async fn product_mismatch_is_checked_first() {
    let h = harness();
    seed(&h.store, "PROD-0001", 1).await;
    h.store
        .update(
            "PROD-0001",
            LicenseUpdate::default().status(LicenseStatus::Inactive),
        )
        .await
        .unwrap();

    let other = ProductRef::External("9001".to_string());
    let err = h
        .licensor
        .activate(ActivationRequest::new("PROD-0001", "a.com").product(other))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::ProductMismatch);
}

#[tokio::test]
async fn email_match_is_enforced_when_flagged() {
    let h = harness();
    seed(&h.store, "MAIL-0001", 2).await;
    h.store
        .update(
            "MAIL-0001",
            LicenseUpdate::default().flags(ValidationFlags {
                require_email_match: true,
                require_domain_whitelist: false,
            }),
        )
        .await
        .unwrap();

    let err = h
        .licensor
        .activate(ActivationRequest::new("MAIL-0001", "a.com").email("thief@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::EmailMismatch);

    let err = h
        .licensor
        .activate(ActivationRequest::new("MAIL-0001", "a.com"))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::EmailMismatch);

    h.licensor
        .activate(ActivationRequest::new("MAIL-0001", "a.com").email(" owner@example.com "))
        .await
        .unwrap();
}

#[tokio::test]
async fn whitelist_restricts_domains_unless_empty() {
    let h = harness();
    seed(&h.store, "WHTL-0001", 0).await;
    seed(&h.store, "WHTL-0002", 0).await;
    let flags = ValidationFlags {
        require_email_match: false,
        require_domain_whitelist: true,
    };

    h.store
        .update(
            "WHTL-0001",
            LicenseUpdate::default()
                .flags(flags)
                .allowed_domains(BTreeSet::from(["https://www.shop.example/".to_string()])),
        )
        .await
        .unwrap();
    h.store
        .update("WHTL-0002", LicenseUpdate::default().flags(flags))
        .await
        .unwrap();

    assert_eq!(
        h.licensor
            .activate(ActivationRequest::new("WHTL-0001", "other.example"))
            .await
            .unwrap_err(),
        LicenseError::DomainNotAllowed
    );
    h.licensor
        .activate(ActivationRequest::new("WHTL-0001", "SHOP.example"))
        .await
        .unwrap();

    // An empty whitelist allows everything.
    h.licensor
        .activate(ActivationRequest::new("WHTL-0002", "anything.example"))
        .await
        .unwrap();
}

#[tokio::test]
async fn fingerprint_and_site_data_follow_the_domain() {
    let h = harness();
    seed(&h.store, "FING-0001", 2).await;

    h.licensor
        .activate(
            ActivationRequest::new("FING-0001", "a.com")
                .fingerprint("install-1")
                .site_data(serde_json::json!({ "wp": "6.4" })),
        )
        .await
        .unwrap();
    h.licensor
        .activate(ActivationRequest::new("FING-0001", "a.com").fingerprint("install-2"))
        .await
        .unwrap();

    let license = h.licensor.license("FING-0001").await.unwrap();
    assert_eq!(license.fingerprints["a.com"], "install-2");
    assert_eq!(license.site_data["a.com"]["wp"], "6.4");

    h.licensor.deactivate("FING-0001", "a.com").await.unwrap();
    let license = h.licensor.license("FING-0001").await.unwrap();
    assert!(license.fingerprints.is_empty());
    assert!(license.site_data.is_empty());
}

#[tokio::test]
async fn deactivate_frees_slot_and_absent_domain_is_noop() {
    let h = harness();
    seed(&h.store, "DEAC-0001", 1).await;

    h.licensor
        .activate(ActivationRequest::new("DEAC-0001", "a.com"))
        .await
        .unwrap();
    let before = h.licensor.license("DEAC-0001").await.unwrap();

    h.licensor.deactivate("DEAC-0001", "b.com").await.unwrap();
    let unchanged = h.licensor.license("DEAC-0001").await.unwrap();
    assert_eq!(unchanged.version, before.version);
    assert!(h.audit.of_type(AuditEventType::Deactivated).is_empty());

    h.licensor
        .deactivate("DEAC-0001", "http://www.A.com/")
        .await
        .unwrap();
    h.licensor
        .activate(ActivationRequest::new("DEAC-0001", "b.com"))
        .await
        .unwrap();
    assert_eq!(h.audit.of_type(AuditEventType::Deactivated).len(), 1);
}

#[tokio::test]
async fn deactivate_unknown_key_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.licensor.deactivate("NOPE-0000", "a.com").await,
        Err(LicenseError::NotFound(_))
    ));
}

#[tokio::test]
async fn force_deactivate_reports_missing_keys() {
    let h = harness();
    seed(&h.store, "FORC-0001", 3).await;
    seed(&h.store, "FORC-0002", 3).await;
    for key in ["FORC-0001", "FORC-0002"] {
        for domain in ["a.com", "b.com"] {
            h.licensor
                .activate(ActivationRequest::new(key, domain))
                .await
                .unwrap();
        }
    }

    let keys = vec![
        "FORC-0001".to_string(),
        "MISSING-1".to_string(),
        "FORC-0002".to_string(),
    ];
    let result = h.licensor.force_deactivate_all(&keys).await;
    assert_eq!(result.updated_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].key, "MISSING-1");
    assert_eq!(result.attempted(), keys.len());

    for key in ["FORC-0001", "FORC-0002"] {
        assert_eq!(h.licensor.license(key).await.unwrap().activation_count(), 0);
    }
    assert_eq!(h.audit.of_type(AuditEventType::ForceDeactivated).len(), 2);
}

#[tokio::test]
async fn validate_checks_domain_on_limited_licenses() {
    let h = harness();
    seed(&h.store, "VALD-0001", 1).await;
    h.licensor
        .activate(ActivationRequest::new("VALD-0001", "a.com"))
        .await
        .unwrap();

    let report = h
        .licensor
        .validate("VALD-0001", Some(&product()), Some("www.a.com"))
        .await
        .unwrap();
    assert_eq!(report.status, LicenseStatus::Active);
    assert_eq!(report.activation_count, 1);

    assert_eq!(
        h.licensor
            .validate("VALD-0001", None, Some("b.com"))
            .await
            .unwrap_err(),
        LicenseError::DomainNotAllowed
    );
    assert_eq!(h.audit.of_type(AuditEventType::Validated).len(), 1);
    assert_eq!(h.audit.of_type(AuditEventType::ValidationFailed).len(), 1);
}

#[tokio::test]
async fn validate_does_not_mutate() {
    let h = harness();
    let created = seed(&h.store, "VALD-0002", 1).await;

    h.licensor.validate("VALD-0002", None, None).await.unwrap();
    let after = h.licensor.license("VALD-0002").await.unwrap();
    assert_eq!(after.version, created.version);
}

#[tokio::test]
async fn product_info_reads_catalog() {
    let h = harness();
    seed(&h.store, "INFO-0001", 1).await;

    assert!(matches!(
        h.licensor.product_info("INFO-0001", None).await,
        Err(LicenseError::NotFound(_))
    ));

    let mut entry = Product::new(product(), "Plugin Pro");
    entry.version = "2.3.1".to_string();
    entry.download_url = Some("https://downloads.example/plugin-pro.zip".to_string());
    h.store.put_product(entry).await.unwrap();

    let info = h.licensor.product_info("INFO-0001", None).await.unwrap();
    assert_eq!(info.title, "Plugin Pro");
    assert_eq!(info.version, "2.3.1");
}
