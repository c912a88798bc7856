//! Licensor - license key lifecycle and activation engine
//!
//! Issues license keys, tracks which domains each license is activated on,
//! enforces activation limits and expiry, and applies bulk administrative
//! changes. Every state change is written to a pluggable audit sink.
//!
//! # Features
//!
//! - `database` - SQL-backed [`LicenseStore`]. Enabled by default.
//! - `sqlite` - SQLite backend. Enabled by default.
//! - `postgres` - PostgreSQL backend.
//! - `server` - Axum HTTP API and the `licensor_server` binary.
//! - `rate-limiting` - Per-IP limits on the client routes (tower_governor).
//! - `background-jobs` - Scheduled expiry reconciliation and expiry warnings.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use licensor::{ActivationRequest, LicenseTemplate, Licensor, MemoryStore, ProductRef};
//!
//! let licensor = Licensor::builder(Arc::new(MemoryStore::new())).build();
//! let product: ProductRef = "internal|42".parse()?;
//! let license = licensor
//!     .create_license(&LicenseTemplate::new(product).activation_limit(2))
//!     .await?;
//! licensor
//!     .activate(ActivationRequest::new(&license.key, "https://www.example.com/"))
//!     .await?;
//! ```

pub mod activation;
pub mod audit;
pub mod bulk;
pub mod config;
pub mod errors;
pub mod license_key;
pub mod locks;
pub mod logging;
pub mod model;
pub mod notify;
pub mod policy;
pub mod service;
pub mod store;

#[cfg(feature = "background-jobs")]
pub mod jobs;

#[cfg(feature = "server")]
pub mod server;

pub use activation::{
    ActivationEngine, ActivationOutcome, ActivationRequest, ProductInfo, ValidationReport,
};
pub use bulk::{BulkCreateResult, LicenseTemplate, Mutation, PeriodUnit, Term};
pub use errors::{LicenseError, LicenseResult};
pub use model::{
    BatchResult, DeleteMode, Expiry, License, LicenseFilter, LicenseStatus, Product, ProductRef,
};
pub use service::Licensor;
pub use store::{LicenseStore, MemoryStore};
