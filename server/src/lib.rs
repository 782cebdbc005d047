//! HTTP boundary for the multi-tenant booking backend.
//!
//! Every request passes through [`middleware::tenant_middleware`], which
//! resolves the tenant from the host, runs the access gate and executes the
//! handler inside its own tenant execution. Tenant-free paths run with no
//! tenant active.

pub mod auth;
pub mod catalog;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::{
    Router,
    routing::{get, post}
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use errors::{ApiError, ApiResult};
pub use state::{AppState, Services};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/metrics", get(routes::metrics_handler))
        .route("/signup", get(routes::signup_handler))
        .route(
            "/subdomains/{name}/availability",
            get(routes::subdomain_availability_handler)
        )
        .route("/api/tenant", get(routes::current_tenant_handler))
        .route(
            "/api/products",
            get(routes::list_products_handler).post(routes::create_product_handler)
        )
        .route("/api/jobs/reindex", post(routes::enqueue_reindex_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::tenant_middleware
        ))
        .layer(axum::middleware::from_fn(auth::principal_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
