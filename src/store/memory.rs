//! In-memory `LicenseStore`.
//!
//! All state sits behind one `RwLock`, so each call is atomic with respect to
//! the others. Useful for tests and for embedding the engine without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::errors::{LicenseError, LicenseResult};
use crate::model::{
    today, DeleteMode, License, LicenseFilter, LicenseUpdate, Product, ProductRef,
};
use crate::store::LicenseStore;

#[derive(Debug, Default)]
struct Inner {
    licenses: BTreeMap<String, License>,
    products: HashMap<ProductRef, Product>,
    customers: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored licenses, trashed ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.licenses.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LicenseStore for MemoryStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<License>> {
        let inner = self.inner.read().await;
        Ok(inner
            .licenses
            .get(key)
            .filter(|license| !license.is_trashed())
            .cloned())
    }

    async fn exists(&self, key: &str) -> LicenseResult<bool> {
        Ok(self.inner.read().await.licenses.contains_key(key))
    }

    async fn create(&self, mut license: License) -> LicenseResult<License> {
        let mut inner = self.inner.write().await;
        if inner.licenses.contains_key(&license.key) {
            return Err(LicenseError::PersistenceFailure(format!(
                "license key {} already exists",
                license.key
            )));
        }
        let now = Utc::now().naive_utc();
        license.created_at = now;
        license.updated_at = now;
        license.version = 1;
        inner.licenses.insert(license.key.clone(), license.clone());
        Ok(license)
    }

    async fn update(&self, key: &str, update: LicenseUpdate) -> LicenseResult<License> {
        let mut inner = self.inner.write().await;
        let license = inner
            .licenses
            .get_mut(key)
            .filter(|license| !license.is_trashed())
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;

        update.apply_to(license);
        license.updated_at = Utc::now().naive_utc();
        license.version += 1;
        Ok(license.clone())
    }

    async fn delete(&self, key: &str, mode: DeleteMode) -> LicenseResult<bool> {
        let mut inner = self.inner.write().await;
        match mode {
            DeleteMode::Hard => {
                let Some(license) = inner.licenses.remove(key) else {
                    return Ok(false);
                };
                if let Some(email) = &license.customer_email {
                    if let Some(keys) = inner.customers.get_mut(email) {
                        keys.remove(key);
                    }
                }
                Ok(true)
            }
            DeleteMode::Soft => match inner.licenses.get_mut(key) {
                Some(license) if !license.is_trashed() => {
                    license.trashed_at = Some(Utc::now().naive_utc());
                    license.version += 1;
                    Ok(true)
                }
                _ => Ok(false),
            },
        }
    }

    async fn restore(&self, key: &str) -> LicenseResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.licenses.get_mut(key) {
            Some(license) if license.is_trashed() => {
                license.trashed_at = None;
                license.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        let today = today();
        let inner = self.inner.read().await;
        Ok(inner
            .licenses
            .values()
            .filter(|license| filter.matches(license, today))
            .cloned()
            .collect())
    }

    async fn get_product(&self, product: &ProductRef) -> LicenseResult<Option<Product>> {
        Ok(self.inner.read().await.products.get(product).cloned())
    }

    async fn put_product(&self, product: Product) -> LicenseResult<Product> {
        let mut inner = self.inner.write().await;
        inner
            .products
            .insert(product.product.clone(), product.clone());
        Ok(product)
    }

    async fn link_customer(&self, email: &str, key: &str) -> LicenseResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .customers
            .entry(email.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn unlink_customer(&self, email: &str, key: &str) -> LicenseResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(keys) = inner.customers.get_mut(email) {
            keys.remove(key);
            if keys.is_empty() {
                inner.customers.remove(email);
            }
        }
        Ok(())
    }

    async fn customer_licenses(&self, email: &str) -> LicenseResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .customers
            .get(email)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LicenseStatus;

    fn license(key: &str) -> License {
        License::new(key, ProductRef::Internal("plugin".into()))
    }

    #[tokio::test]
    async fn create_rejects_duplicate_keys() {
        let store = MemoryStore::new();
        store.create(license("K1")).await.unwrap();
        let err = store.create(license("K1")).await.unwrap_err();
        assert!(matches!(err, LicenseError::PersistenceFailure(_)));
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = MemoryStore::new();
        let created = store.create(license("K1")).await.unwrap();
        let updated = store
            .update("K1", LicenseUpdate::default().status(LicenseStatus::Inactive))
            .await
            .unwrap();

        assert_eq!(updated.status, LicenseStatus::Inactive);
        assert_eq!(updated.version, created.version + 1);
    }

    #[tokio::test]
    async fn update_unknown_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("NOPE", LicenseUpdate::default().activation_limit(2))
            .await
            .unwrap_err();
        assert_eq!(err, LicenseError::NotFound("NOPE".into()));
    }

    #[tokio::test]
    async fn soft_delete_hides_but_keeps_key_reserved() {
        let store = MemoryStore::new();
        store.create(license("K1")).await.unwrap();

        assert!(store.delete("K1", DeleteMode::Soft).await.unwrap());
        assert!(store.get("K1").await.unwrap().is_none());
        assert!(store.exists("K1").await.unwrap());
        assert!(store.find(&LicenseFilter::all()).await.unwrap().is_empty());

        assert!(store.restore("K1").await.unwrap());
        assert!(store.get("K1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hard_delete_frees_the_key() {
        let store = MemoryStore::new();
        store.create(license("K1")).await.unwrap();

        assert!(store.delete("K1", DeleteMode::Hard).await.unwrap());
        assert!(!store.exists("K1").await.unwrap());
        assert!(!store.delete("K1", DeleteMode::Hard).await.unwrap());
    }

    #[tokio::test]
    async fn find_returns_licenses_in_key_order() {
        let store = MemoryStore::new();
        for key in ["K3", "K1", "K2"] {
            store.create(license(key)).await.unwrap();
        }
        let keys: Vec<String> = store
            .find(&LicenseFilter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.key)
            .collect();
        assert_eq!(keys, vec!["K1", "K2", "K3"]);
    }

    #[tokio::test]
    async fn customer_index_links_and_unlinks() {
        let store = MemoryStore::new();
        store.link_customer("a@example.com", "K2").await.unwrap();
        store.link_customer("a@example.com", "K1").await.unwrap();
        assert_eq!(
            store.customer_licenses("a@example.com").await.unwrap(),
            vec!["K1", "K2"]
        );

        store.unlink_customer("a@example.com", "K1").await.unwrap();
        assert_eq!(
            store.customer_licenses("a@example.com").await.unwrap(),
            vec!["K2"]
        );
        assert!(store.customer_licenses("b@example.com").await.unwrap().is_empty());
    }
}
