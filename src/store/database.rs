//! SQL-backed `LicenseStore` over SQLite or Postgres.
//!
//! Set and map fields live in JSON text columns. `update` is a
//! read-modify-write inside a transaction and only commits if the `version`
//! column still holds the value that was read, so a concurrent writer in
//! another process surfaces as `PersistenceFailure` instead of a lost update.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{query, query_as, FromRow, QueryBuilder};
use std::sync::Arc;
use tracing::{error, info};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::{get_config, DatabaseConfig};
use crate::errors::{LicenseError, LicenseResult};
use crate::model::{
    today, DeleteMode, Expiry, License, LicenseFilter, LicenseStatus, LicenseUpdate, Product,
    ProductRef,
};
use crate::store::LicenseStore;

/// Row shape of the `licenses` table.
#[derive(Debug, Clone, FromRow)]
struct LicenseRow {
    key: String,
    status: String,
    product: String,
    customer_email: Option<String>,
    expiry: String,
    activation_limit: i64,
    activated_domains: String,
    fingerprints: String,
    site_data: String,
    flags: String,
    allowed_domains: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    trashed_at: Option<NaiveDateTime>,
    expiry_warning_sent_at: Option<NaiveDateTime>,
    version: i64,
}

#[derive(Debug, Clone, FromRow)]
struct ProductRow {
    product: String,
    title: String,
    version: String,
    download_url: Option<String>,
}

/// Values bound for the mutable columns of a license, in column order.
struct LicenseColumns {
    status: String,
    product: String,
    customer_email: Option<String>,
    expiry: String,
    activation_limit: i64,
    activated_domains: String,
    fingerprints: String,
    site_data: String,
    flags: String,
    allowed_domains: String,
    updated_at: NaiveDateTime,
    trashed_at: Option<NaiveDateTime>,
    expiry_warning_sent_at: Option<NaiveDateTime>,
}

impl LicenseColumns {
    fn from_license(license: &License) -> LicenseResult<Self> {
        Ok(Self {
            status: license.status.as_str().to_string(),
            product: license.product.to_string(),
            customer_email: license.customer_email.clone(),
            expiry: license.expiry.to_string(),
            activation_limit: i64::from(license.activation_limit),
            activated_domains: to_json(&license.activated_domains)?,
            fingerprints: to_json(&license.fingerprints)?,
            site_data: to_json(&license.site_data)?,
            flags: to_json(&license.flags)?,
            allowed_domains: to_json(&license.allowed_domains)?,
            updated_at: license.updated_at,
            trashed_at: license.trashed_at,
            expiry_warning_sent_at: license.expiry_warning_sent_at,
        })
    }
}

/// Binds `LicenseColumns` in the order used by every INSERT and UPDATE below.
macro_rules! bind_columns {
    ($query:expr, $cols:expr) => {
        $query
            .bind(&$cols.status)
            .bind(&$cols.product)
            .bind(&$cols.customer_email)
            .bind(&$cols.expiry)
            .bind($cols.activation_limit)
            .bind(&$cols.activated_domains)
            .bind(&$cols.fingerprints)
            .bind(&$cols.site_data)
            .bind(&$cols.flags)
            .bind(&$cols.allowed_domains)
            .bind($cols.updated_at)
            .bind($cols.trashed_at)
            .bind($cols.expiry_warning_sent_at)
    };
}

/// `SELECT` over `licenses` narrowed by the filter's column predicates.
fn find_query<'a, DB>(filter: &LicenseFilter) -> QueryBuilder<'a, DB>
where
    DB: sqlx::Database,
    DB::Arguments<'a>: Default,
    String: sqlx::Encode<'a, DB> + sqlx::Type<DB>,
{
    let mut select = QueryBuilder::new("SELECT * FROM licenses WHERE 1 = 1");
    if !filter.include_trashed {
        select.push(" AND trashed_at IS NULL");
    }
    if let Some(product) = &filter.product {
        select.push(" AND product = ").push_bind(product.to_string());
    }
    if let Some(email) = &filter.customer_email {
        select.push(" AND customer_email = ").push_bind(email.clone());
    }
    if let Some(keys) = &filter.keys {
        select.push(" AND key IN (");
        let mut list = select.separated(", ");
        for key in keys {
            list.push_bind(key.clone());
        }
        list.push_unseparated(")");
    }
    select.push(" ORDER BY key");
    select
}

fn to_json<T: Serialize>(value: &T) -> LicenseResult<String> {
    serde_json::to_string(value)
        .map_err(|e| LicenseError::PersistenceFailure(format!("failed to encode column: {e}")))
}

fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> LicenseResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        error!(column, "Corrupt JSON column: {e}");
        LicenseError::PersistenceFailure(format!("corrupt {column} column: {e}"))
    })
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> LicenseError {
    move |e| {
        error!(operation, "Database error: {e}");
        LicenseError::PersistenceFailure(format!("{operation}: {e}"))
    }
}

fn create_error(key: &str) -> impl Fn(sqlx::Error) -> LicenseError + '_ {
    move |e| {
        let duplicate = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if duplicate {
            LicenseError::PersistenceFailure(format!("license key {key} already exists"))
        } else {
            db_error("create license")(e)
        }
    }
}

fn stale_version(key: &str) -> LicenseError {
    LicenseError::PersistenceFailure(format!(
        "license {key} was modified concurrently; retry the operation"
    ))
}

impl TryFrom<LicenseRow> for License {
    type Error = LicenseError;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, e: LicenseError| {
            LicenseError::PersistenceFailure(format!("corrupt {column} column: {e}"))
        };

        Ok(License {
            status: row.status.parse::<LicenseStatus>().map_err(|e| corrupt("status", e))?,
            product: row.product.parse::<ProductRef>().map_err(|e| corrupt("product", e))?,
            expiry: row.expiry.parse::<Expiry>().map_err(|e| corrupt("expiry", e))?,
            activation_limit: u32::try_from(row.activation_limit).map_err(|_| {
                LicenseError::PersistenceFailure(format!(
                    "activation_limit {} out of range",
                    row.activation_limit
                ))
            })?,
            activated_domains: from_json(&row.activated_domains, "activated_domains")?,
            fingerprints: from_json(&row.fingerprints, "fingerprints")?,
            site_data: from_json(&row.site_data, "site_data")?,
            flags: from_json(&row.flags, "flags")?,
            allowed_domains: from_json(&row.allowed_domains, "allowed_domains")?,
            key: row.key,
            customer_email: row.customer_email,
            created_at: row.created_at,
            updated_at: row.updated_at,
            trashed_at: row.trashed_at,
            expiry_warning_sent_at: row.expiry_warning_sent_at,
            version: u64::try_from(row.version).unwrap_or_default(),
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = LicenseError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            product: row.product.parse::<ProductRef>().map_err(|e| {
                LicenseError::PersistenceFailure(format!("corrupt product column: {e}"))
            })?,
            title: row.title,
            version: row.version,
            download_url: row.download_url,
        })
    }
}

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Connect using the global configuration.
    pub async fn new() -> LicenseResult<Arc<Self>> {
        let config = get_config()?;
        Self::connect(&config.database).await
    }

    /// Connect to the backend named by `config.db_type`.
    pub async fn connect(config: &DatabaseConfig) -> LicenseResult<Arc<Self>> {
        match config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        LicenseError::PersistenceFailure(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(LicenseError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        LicenseError::PersistenceFailure(format!(
                            "failed to connect to PostgreSQL: {e}"
                        ))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(LicenseError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(LicenseError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// True if the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("SELECT 1").execute(pool).await.is_ok(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query("SELECT 1").execute(pool).await.is_ok(),
        }
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> LicenseResult<()> {
        let statements: &[&str] = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => &[
                r#"
                CREATE TABLE IF NOT EXISTS licenses (
                    key                     TEXT PRIMARY KEY,
                    status                  TEXT NOT NULL,
                    product                 TEXT NOT NULL,
                    customer_email          TEXT,
                    expiry                  TEXT NOT NULL,
                    activation_limit        INTEGER NOT NULL,
                    activated_domains       TEXT NOT NULL,
                    fingerprints            TEXT NOT NULL,
                    site_data               TEXT NOT NULL,
                    flags                   TEXT NOT NULL,
                    allowed_domains         TEXT NOT NULL,
                    created_at              TEXT NOT NULL,
                    updated_at              TEXT NOT NULL,
                    trashed_at              TEXT,
                    expiry_warning_sent_at  TEXT,
                    version                 INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    product       TEXT PRIMARY KEY,
                    title         TEXT NOT NULL,
                    version       TEXT NOT NULL,
                    download_url  TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS customer_licenses (
                    email        TEXT NOT NULL,
                    license_key  TEXT NOT NULL,
                    PRIMARY KEY (email, license_key)
                )
                "#,
            ],
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => &[
                r#"
                CREATE TABLE IF NOT EXISTS licenses (
                    key                     TEXT PRIMARY KEY,
                    status                  TEXT NOT NULL,
                    product                 TEXT NOT NULL,
                    customer_email          TEXT,
                    expiry                  TEXT NOT NULL,
                    activation_limit        BIGINT NOT NULL,
                    activated_domains       TEXT NOT NULL,
                    fingerprints            TEXT NOT NULL,
                    site_data               TEXT NOT NULL,
                    flags                   TEXT NOT NULL,
                    allowed_domains         TEXT NOT NULL,
                    created_at              TIMESTAMP NOT NULL,
                    updated_at              TIMESTAMP NOT NULL,
                    trashed_at              TIMESTAMP,
                    expiry_warning_sent_at  TIMESTAMP,
                    version                 BIGINT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    product       TEXT PRIMARY KEY,
                    title         TEXT NOT NULL,
                    version       TEXT NOT NULL,
                    download_url  TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS customer_licenses (
                    email        TEXT NOT NULL,
                    license_key  TEXT NOT NULL,
                    PRIMARY KEY (email, license_key)
                )
                "#,
            ],
        };

        for statement in statements {
            match self {
                #[cfg(feature = "sqlite")]
                Database::SQLite(pool) => {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_error("migrate"))?;
                }
                #[cfg(feature = "postgres")]
                Database::Postgres(pool) => {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(db_error("migrate"))?;
                }
            }
        }

        info!(db_type = self.db_type(), "Database schema ready");
        Ok(())
    }

    /// Row for `key`, trashed or not.
    async fn fetch_row(&self, key: &str) -> LicenseResult<Option<LicenseRow>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(db_error("get license")),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE key = $1")
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .map_err(db_error("get license"))
            }
        }
    }

    /// Overwrite the mutable columns of `license` if the stored version is still `expected`.
    async fn write_if_version(&self, license: &License, expected: i64) -> LicenseResult<()> {
        let cols = LicenseColumns::from_license(license)?;
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let mut tx = pool.begin().await.map_err(db_error("begin update"))?;
                let q = query(
                    r#"
                    UPDATE licenses SET
                        status = ?, product = ?, customer_email = ?, expiry = ?,
                        activation_limit = ?, activated_domains = ?, fingerprints = ?,
                        site_data = ?, flags = ?, allowed_domains = ?, updated_at = ?,
                        trashed_at = ?, expiry_warning_sent_at = ?, version = version + 1
                    WHERE key = ? AND version = ?
                    "#,
                );
                let rows = bind_columns!(q, cols)
                    .bind(&license.key)
                    .bind(expected)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("update license"))?
                    .rows_affected();
                tx.commit().await.map_err(db_error("commit update"))?;
                rows
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(db_error("begin update"))?;
                let q = query(
                    r#"
                    UPDATE licenses SET
                        status = $1, product = $2, customer_email = $3, expiry = $4,
                        activation_limit = $5, activated_domains = $6, fingerprints = $7,
                        site_data = $8, flags = $9, allowed_domains = $10, updated_at = $11,
                        trashed_at = $12, expiry_warning_sent_at = $13, version = version + 1
                    WHERE key = $14 AND version = $15
                    "#,
                );
                let rows = bind_columns!(q, cols)
                    .bind(&license.key)
                    .bind(expected)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("update license"))?
                    .rows_affected();
                tx.commit().await.map_err(db_error("commit update"))?;
                rows
            }
        };

        if rows == 0 {
            return Err(stale_version(&license.key));
        }
        Ok(())
    }
}

#[async_trait]
impl LicenseStore for Database {
    async fn get(&self, key: &str) -> LicenseResult<Option<License>> {
        match self.fetch_row(key).await? {
            Some(row) if row.trashed_at.is_none() => License::try_from(row).map(Some),
            _ => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> LicenseResult<bool> {
        Ok(self.fetch_row(key).await?.is_some())
    }

    async fn create(&self, mut license: License) -> LicenseResult<License> {
        let now = Utc::now().naive_utc();
        license.created_at = now;
        license.updated_at = now;
        license.version = 1;
        let cols = LicenseColumns::from_license(&license)?;

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let q = query(
                    r#"
                    INSERT INTO licenses (
                        status, product, customer_email, expiry, activation_limit,
                        activated_domains, fingerprints, site_data, flags, allowed_domains,
                        updated_at, trashed_at, expiry_warning_sent_at,
                        key, created_at, version
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                    "#,
                );
                bind_columns!(q, cols)
                    .bind(&license.key)
                    .bind(license.created_at)
                    .execute(pool)
                    .await
                    .map_err(create_error(&license.key))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let q = query(
                    r#"
                    INSERT INTO licenses (
                        status, product, customer_email, expiry, activation_limit,
                        activated_domains, fingerprints, site_data, flags, allowed_domains,
                        updated_at, trashed_at, expiry_warning_sent_at,
                        key, created_at, version
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 1)
                    "#,
                );
                bind_columns!(q, cols)
                    .bind(&license.key)
                    .bind(license.created_at)
                    .execute(pool)
                    .await
                    .map_err(create_error(&license.key))?;
            }
        }

        Ok(license)
    }

    async fn update(&self, key: &str, update: LicenseUpdate) -> LicenseResult<License> {
        let row = self
            .fetch_row(key)
            .await?
            .filter(|row| row.trashed_at.is_none())
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;
        let expected = row.version;

        let mut license = License::try_from(row)?;
        update.apply_to(&mut license);
        license.updated_at = Utc::now().naive_utc();

        self.write_if_version(&license, expected).await?;
        license.version += 1;
        Ok(license)
    }

    async fn delete(&self, key: &str, mode: DeleteMode) -> LicenseResult<bool> {
        match mode {
            DeleteMode::Soft => {
                let Some(row) = self.fetch_row(key).await? else {
                    return Ok(false);
                };
                if row.trashed_at.is_some() {
                    return Ok(false);
                }
                let expected = row.version;
                let mut license = License::try_from(row)?;
                license.trashed_at = Some(Utc::now().naive_utc());
                self.write_if_version(&license, expected).await?;
                Ok(true)
            }
            DeleteMode::Hard => {
                let rows = match self {
                    #[cfg(feature = "sqlite")]
                    Database::SQLite(pool) => {
                        let mut tx = pool.begin().await.map_err(db_error("begin delete"))?;
                        query("DELETE FROM customer_licenses WHERE license_key = ?")
                            .bind(key)
                            .execute(&mut *tx)
                            .await
                            .map_err(db_error("unlink customer"))?;
                        let rows = query("DELETE FROM licenses WHERE key = ?")
                            .bind(key)
                            .execute(&mut *tx)
                            .await
                            .map_err(db_error("delete license"))?
                            .rows_affected();
                        tx.commit().await.map_err(db_error("commit delete"))?;
                        rows
                    }
                    #[cfg(feature = "postgres")]
                    Database::Postgres(pool) => {
                        let mut tx = pool.begin().await.map_err(db_error("begin delete"))?;
                        query("DELETE FROM customer_licenses WHERE license_key = $1")
                            .bind(key)
                            .execute(&mut *tx)
                            .await
                            .map_err(db_error("unlink customer"))?;
                        let rows = query("DELETE FROM licenses WHERE key = $1")
                            .bind(key)
                            .execute(&mut *tx)
                            .await
                            .map_err(db_error("delete license"))?
                            .rows_affected();
                        tx.commit().await.map_err(db_error("commit delete"))?;
                        rows
                    }
                };
                Ok(rows > 0)
            }
        }
    }

    async fn restore(&self, key: &str) -> LicenseResult<bool> {
        let Some(row) = self.fetch_row(key).await? else {
            return Ok(false);
        };
        if row.trashed_at.is_none() {
            return Ok(false);
        }
        let expected = row.version;
        let mut license = License::try_from(row)?;
        license.trashed_at = None;
        self.write_if_version(&license, expected).await?;
        Ok(true)
    }

    async fn find(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        if filter.keys.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        // Effective status and expiry ranges depend on today's date and run
        // in Rust over the rows the WHERE clause lets through.
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let mut select = find_query::<sqlx::Sqlite>(filter);
                select
                    .build_query_as::<LicenseRow>()
                    .fetch_all(pool)
                    .await
                    .map_err(db_error("find licenses"))?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let mut select = find_query::<sqlx::Postgres>(filter);
                select
                    .build_query_as::<LicenseRow>()
                    .fetch_all(pool)
                    .await
                    .map_err(db_error("find licenses"))?
            }
        };

        let today = today();
        let mut licenses = Vec::new();
        for row in rows {
            let license = License::try_from(row)?;
            if filter.matches(&license, today) {
                licenses.push(license);
            }
        }
        Ok(licenses)
    }

    async fn get_product(&self, product: &ProductRef) -> LicenseResult<Option<Product>> {
        let row = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, ProductRow>("SELECT * FROM products WHERE product = ?")
                .bind(product.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_error("get product"))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, ProductRow>("SELECT * FROM products WHERE product = $1")
                    .bind(product.to_string())
                    .fetch_optional(pool)
                    .await
                    .map_err(db_error("get product"))?
            }
        };
        row.map(Product::try_from).transpose()
    }

    async fn put_product(&self, product: Product) -> LicenseResult<Product> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO products (product, title, version, download_url)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(product) DO UPDATE SET
                        title        = excluded.title,
                        version      = excluded.version,
                        download_url = excluded.download_url
                    "#,
                )
                .bind(product.product.to_string())
                .bind(&product.title)
                .bind(&product.version)
                .bind(&product.download_url)
                .execute(pool)
                .await
                .map_err(db_error("put product"))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO products (product, title, version, download_url)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (product) DO UPDATE SET
                        title        = EXCLUDED.title,
                        version      = EXCLUDED.version,
                        download_url = EXCLUDED.download_url
                    "#,
                )
                .bind(product.product.to_string())
                .bind(&product.title)
                .bind(&product.version)
                .bind(&product.download_url)
                .execute(pool)
                .await
                .map_err(db_error("put product"))?;
            }
        }
        Ok(product)
    }

    async fn link_customer(&self, email: &str, key: &str) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("INSERT OR IGNORE INTO customer_licenses (email, license_key) VALUES (?, ?)")
                    .bind(email)
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(db_error("link customer"))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO customer_licenses (email, license_key) VALUES ($1, $2) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(email)
                .bind(key)
                .execute(pool)
                .await
                .map_err(db_error("link customer"))?;
            }
        }
        Ok(())
    }

    async fn unlink_customer(&self, email: &str, key: &str) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("DELETE FROM customer_licenses WHERE email = ? AND license_key = ?")
                    .bind(email)
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(db_error("unlink customer"))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("DELETE FROM customer_licenses WHERE email = $1 AND license_key = $2")
                    .bind(email)
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(db_error("unlink customer"))?;
            }
        }
        Ok(())
    }

    async fn customer_licenses(&self, email: &str) -> LicenseResult<Vec<String>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlx::query_scalar::<_, String>(
                "SELECT license_key FROM customer_licenses WHERE email = ? ORDER BY license_key",
            )
            .bind(email)
            .fetch_all(pool)
            .await
            .map_err(db_error("customer licenses")),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => sqlx::query_scalar::<_, String>(
                "SELECT license_key FROM customer_licenses WHERE email = $1 ORDER BY license_key",
            )
            .bind(email)
            .fetch_all(pool)
            .await
            .map_err(db_error("customer licenses")),
        }
    }
}
