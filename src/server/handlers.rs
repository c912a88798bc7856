use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activation::{ActivationOutcome, ActivationRequest, ProductInfo, ValidationReport};
use crate::audit::{AuditEvent, MemoryAuditLog};
use crate::bulk::{BulkCreateResult, LicenseTemplate, Mutation};
use crate::config::RateLimitConfig;
use crate::model::{BatchResult, License, LicenseFilter, LicenseStatus, ProductRef};
use crate::server::api_error::ApiError;
use crate::server::auth::AuthState;
use crate::server::logging::HealthResponse;
use crate::service::Licensor;
use crate::store::Database;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub licensor: Arc<Licensor>,
    /// Backing database, when the licensor runs on one. `None` for the
    /// in-memory store.
    pub database: Option<Arc<Database>>,
    /// Guards the admin routes. Disabled unless set with [`AppState::with_auth`].
    pub auth: AuthState,
    /// Recent per-license events served by the activity endpoint.
    pub activity: Option<Arc<MemoryAuditLog>>,
    /// Client route limits, applied with the `rate-limiting` feature.
    pub rate_limit: Option<RateLimitConfig>,
}

impl AppState {
    pub fn new(licensor: Arc<Licensor>, database: Option<Arc<Database>>) -> Self {
        Self {
            licensor,
            database,
            auth: AuthState::disabled(),
            activity: None,
            rate_limit: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthState) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_activity_log(mut self, log: Arc<MemoryAuditLog>) -> Self {
        self.activity = Some(log);
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config.enabled.then_some(config);
        self
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub key: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub key: String,
    pub domain: String,
    pub deactivated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub key: String,
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub key: String,
    #[serde(default)]
    pub product: Option<ProductRef>,
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateRequest {
    #[serde(flatten)]
    pub template: LicenseTemplate,
    pub count: usize,
}

/// Target either a filter or an explicit key list, never both.
#[derive(Debug, Deserialize)]
pub struct BulkApplyRequest {
    #[serde(default)]
    pub filter: Option<LicenseFilter>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    pub mutation: Mutation,
}

#[derive(Debug, Deserialize)]
pub struct ForceDeactivateRequest {
    pub keys: Vec<String>,
}

/// Query string of `GET /api/v1/licenses`.
#[derive(Debug, Default, Deserialize)]
pub struct ListLicensesQuery {
    #[serde(default)]
    pub status: Option<LicenseStatus>,
    /// `internal|<id>` or `external|<id>`
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub include_trashed: bool,
}

impl From<ListLicensesQuery> for LicenseFilter {
    fn from(query: ListLicensesQuery) -> Self {
        LicenseFilter {
            status: query.status,
            product: query.product,
            customer_email: query.customer,
            include_trashed: query.include_trashed,
            ..LicenseFilter::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub key: String,
    /// Oldest first. Only events since the server started are retained.
    pub events: Vec<AuditEvent>,
}

// ============================================================================
// Client endpoints
// ============================================================================

/// `POST /api/v1/activate`
pub async fn activate_handler(
    State(state): State<AppState>,
    Json(payload): Json<ActivationRequest>,
) -> ApiResult<ActivationOutcome> {
    let key = payload.key.clone();
    match state.licensor.activate(payload).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            warn!(license_key = %key, "Activation failed: {e}");
            Err(e.into())
        }
    }
}

/// `POST /api/v1/deactivate`
pub async fn deactivate_handler(
    State(state): State<AppState>,
    Json(payload): Json<DeactivateRequest>,
) -> ApiResult<DeactivateResponse> {
    state
        .licensor
        .deactivate(&payload.key, &payload.domain)
        .await?;

    Ok(Json(DeactivateResponse {
        key: payload.key,
        domain: payload.domain,
        deactivated: true,
    }))
}

/// `POST /api/v1/validate`
pub async fn validate_handler(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> ApiResult<ValidationReport> {
    let report = state
        .licensor
        .validate(
            &payload.key,
            payload.product.as_ref(),
            payload.domain.as_deref(),
        )
        .await?;
    Ok(Json(report))
}

/// `POST /api/v1/info`
pub async fn info_handler(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> ApiResult<ProductInfo> {
    let info = state
        .licensor
        .product_info(&payload.key, payload.product.as_ref())
        .await?;
    Ok(Json(info))
}

// ============================================================================
// Admin endpoints
// ============================================================================

/// `POST /api/v1/licenses`
pub async fn create_license_handler(
    State(state): State<AppState>,
    Json(template): Json<LicenseTemplate>,
) -> Result<(StatusCode, Json<License>), ApiError> {
    let license = state.licensor.create_license(&template).await?;
    info!(license_key = %license.key, product = %license.product, "Created license");
    Ok((StatusCode::CREATED, Json(license)))
}

/// `GET /api/v1/licenses?status=&product=&customer=&include_trashed=`
pub async fn list_licenses_handler(
    State(state): State<AppState>,
    Query(query): Query<ListLicensesQuery>,
) -> ApiResult<Vec<License>> {
    let filter = LicenseFilter::from(query);
    Ok(Json(state.licensor.find(&filter).await?))
}

/// `GET /api/v1/licenses/:key/activity`
pub async fn license_activity_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ActivityResponse> {
    // Unknown keys answer 404 rather than an empty history.
    state.licensor.license(&key).await?;
    let events = state
        .activity
        .as_ref()
        .map(|log| log.entries(&key))
        .unwrap_or_default();
    Ok(Json(ActivityResponse { key, events }))
}

/// `GET /api/v1/licenses/:key`
pub async fn get_license_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<License> {
    Ok(Json(state.licensor.license(&key).await?))
}

/// `POST /api/v1/licenses/:key/restore`
pub async fn restore_license_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<License> {
    state.licensor.restore(&key).await?;
    Ok(Json(state.licensor.license(&key).await?))
}

/// `GET /api/v1/customers/:email/licenses`
pub async fn customer_licenses_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Vec<License>> {
    Ok(Json(state.licensor.customer_licenses(&email).await?))
}

/// `POST /api/v1/licenses/bulk`
pub async fn bulk_create_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkCreateRequest>,
) -> Result<(StatusCode, Json<BulkCreateResult>), ApiError> {
    let result = state
        .licensor
        .bulk_create(&payload.template, payload.count)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// `POST /api/v1/licenses/bulk/apply`
pub async fn bulk_apply_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkApplyRequest>,
) -> ApiResult<BatchResult> {
    let result = match (payload.filter, payload.keys) {
        (Some(filter), None) => state.licensor.apply(&filter, payload.mutation).await?,
        (None, Some(keys)) => state.licensor.apply_to_keys(&keys, payload.mutation).await?,
        _ => {
            return Err(ApiError::invalid_request(
                "exactly one of `filter` or `keys` is required",
            ))
        }
    };
    Ok(Json(result))
}

/// `POST /api/v1/licenses/force-deactivate`
pub async fn force_deactivate_handler(
    State(state): State<AppState>,
    Json(payload): Json<ForceDeactivateRequest>,
) -> ApiResult<BatchResult> {
    Ok(Json(state.licensor.force_deactivate_all(&payload.keys).await))
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = match &state.database {
        Some(db) => HealthResponse::healthy(db.ping().await, db.db_type()),
        None => HealthResponse::healthy(true, "memory"),
    };
    Json(health)
}
