//! Persistence abstraction for licenses, products and the customer index.
//!
//! - `memory`   → in-process store backed by `tokio::sync::RwLock`
//! - `database` → SQLite/Postgres store (requires the `database` feature)
//!
//! Every component receives an `Arc<dyn LicenseStore>`; nothing reaches for
//! ambient global state.

use async_trait::async_trait;

use crate::errors::LicenseResult;
use crate::model::{DeleteMode, License, LicenseFilter, LicenseUpdate, Product, ProductRef};

pub mod memory;

#[cfg(feature = "database")]
pub mod database;

pub use memory::MemoryStore;

#[cfg(feature = "database")]
pub use database::Database;

#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Fetch a live (non-trashed) license.
    async fn get(&self, key: &str) -> LicenseResult<Option<License>>;

    /// True if any license, trashed or not, uses `key`.
    async fn exists(&self, key: &str) -> LicenseResult<bool>;

    /// Insert a new license. Fails with `PersistenceFailure` if the key is taken.
    async fn create(&self, license: License) -> LicenseResult<License>;

    /// Apply a partial update atomically and return the stored result.
    ///
    /// Fails with `NotFound` for unknown or trashed keys.
    async fn update(&self, key: &str, update: LicenseUpdate) -> LicenseResult<License>;

    /// Returns `false` if nothing was deleted.
    async fn delete(&self, key: &str, mode: DeleteMode) -> LicenseResult<bool>;

    /// Bring a trashed license back. Returns `false` if it was not trashed.
    async fn restore(&self, key: &str) -> LicenseResult<bool>;

    /// All matching licenses, ordered by key. Calling again restarts the query.
    async fn find(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>>;

    async fn get_product(&self, product: &ProductRef) -> LicenseResult<Option<Product>>;

    async fn put_product(&self, product: Product) -> LicenseResult<Product>;

    /// Record `key` in the reverse license list of `email`.
    async fn link_customer(&self, email: &str, key: &str) -> LicenseResult<()>;

    async fn unlink_customer(&self, email: &str, key: &str) -> LicenseResult<()>;

    /// Keys in the reverse license list of `email`, sorted.
    async fn customer_licenses(&self, email: &str) -> LicenseResult<Vec<String>>;
}
