use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use crate::server::auth::require_api_key;
use crate::server::handlers::{
    activate_handler, bulk_apply_handler, bulk_create_handler, create_license_handler,
    customer_licenses_handler, deactivate_handler, force_deactivate_handler, get_license_handler,
    health_handler, info_handler, license_activity_handler, list_licenses_handler,
    restore_license_handler, validate_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

/// Build the Licensor HTTP router.
///
/// # Routes
///
/// ## Client endpoints (rate limited per IP with `rate-limiting`)
/// - `POST /api/v1/activate` - Activate a license on a domain
/// - `POST /api/v1/deactivate` - Free a domain's slot
/// - `POST /api/v1/validate` - Check a license without changing it
/// - `POST /api/v1/info` - Product update metadata for a license
///
/// ## Admin endpoints (API key required when auth is enabled)
/// - `POST /api/v1/licenses` - Create a license
/// - `GET /api/v1/licenses` - List licenses by status, product or customer
/// - `GET /api/v1/licenses/:key` - Get a license
/// - `GET /api/v1/licenses/:key/activity` - Recent audit events of a license
/// - `POST /api/v1/licenses/:key/restore` - Restore a trashed license
/// - `POST /api/v1/licenses/bulk` - Create many licenses from one template
/// - `POST /api/v1/licenses/bulk/apply` - Apply a mutation to a filter or key list
/// - `POST /api/v1/licenses/force-deactivate` - Clear all activations of many keys
/// - `GET /api/v1/customers/:email/licenses` - Licenses owned by a customer
///
/// ## Operational
/// - `GET /health`
pub fn build_router(state: AppState) -> Router {
    let client = client_routes(&state);

    let admin = Router::new()
        .route(
            "/api/v1/licenses",
            post(create_license_handler).get(list_licenses_handler),
        )
        .route("/api/v1/licenses/bulk", post(bulk_create_handler))
        .route("/api/v1/licenses/bulk/apply", post(bulk_apply_handler))
        .route(
            "/api/v1/licenses/force-deactivate",
            post(force_deactivate_handler),
        )
        .route("/api/v1/licenses/:key", get(get_license_handler))
        .route(
            "/api/v1/licenses/:key/activity",
            get(license_activity_handler),
        )
        .route(
            "/api/v1/licenses/:key/restore",
            post(restore_license_handler),
        )
        .route(
            "/api/v1/customers/:email/licenses",
            get(customer_licenses_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(client)
        .merge(admin)
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(middleware::from_fn(request_logging_middleware)))
        .with_state(state)
}

fn client_routes(state: &AppState) -> Router<AppState> {
    let routes = Router::new()
        .route("/api/v1/activate", post(activate_handler))
        .route("/api/v1/deactivate", post(deactivate_handler))
        .route("/api/v1/validate", post(validate_handler))
        .route("/api/v1/info", post(info_handler));

    #[cfg(feature = "rate-limiting")]
    {
        if let Some(config) = &state.rate_limit {
            match crate::server::rate_limit::client_rate_limiter(config) {
                Ok(layer) => return routes.layer(layer),
                Err(e) => tracing::warn!("Client rate limiting disabled: {e}"),
            }
        }
    }

    #[cfg(not(feature = "rate-limiting"))]
    {
        if state.rate_limit.is_some() {
            tracing::debug!("Rate limit configured but the `rate-limiting` feature is off");
        }
    }

    routes
}
