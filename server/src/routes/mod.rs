use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response}
};
use context::{Authorized, ScopeEnforcer, TenantContext};
use serde::Serialize;
use serde_json::{Value, json};
use tenant_core::Subdomain;
use validator::Validate;

use crate::catalog::{NewProduct, Product, REINDEX_JOB, ReindexRequest};
use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn health_handler() -> &'static str {
    "OK"
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

pub async fn signup_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "signup": "open",
        "base_domain": state.tenancy.base_domain,
        "reserved_subdomains": state.tenancy.reserved_subdomains
    }))
}

#[derive(Debug, Serialize)]
pub struct Availability {
    pub subdomain: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>
}

pub async fn subdomain_availability_handler(
    State(state): State<AppState>,
    Path(name): Path<String>
) -> ApiResult<Json<Availability>> {
    let subdomain = Subdomain::parse(&name)?;

    let reason = if state
        .tenancy
        .reserved_subdomains
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(subdomain.as_str()))
    {
        Some("reserved")
    } else if state.directory.find_by_subdomain(&subdomain).await?.is_some() {
        Some("taken")
    } else {
        None
    };

    Ok(Json(Availability {
        subdomain: subdomain.to_string(),
        available: reason.is_none(),
        reason
    }))
}

pub async fn current_tenant_handler(Extension(authorized): Extension<Authorized>) -> ApiResult<Json<Value>> {
    let tenant = TenantContext::require("tenant")?;
    Ok(Json(json!({
        "id": tenant.id,
        "name": tenant.name,
        "subdomain": tenant.subdomain,
        "custom_domain": tenant.custom_domain,
        "status": tenant.status,
        "user_id": authorized.principal.user_id
    })))
}

pub async fn list_products_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Product>>> {
    let scope = ScopeEnforcer::scoped::<Product>()?;
    Ok(Json(state.products.list(&scope)))
}

pub async fn create_product_handler(
    State(state): State<AppState>,
    Json(request): Json<NewProduct>
) -> ApiResult<(StatusCode, Json<Product>)> {
    request.validate()?;

    let mut product = request.into_product();
    ScopeEnforcer::assign_tenant_on_create(&mut product)?;

    let scope = ScopeEnforcer::scoped::<Product>()?;
    let created = state.products.insert(&scope, product)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn enqueue_reindex_handler(
    State(state): State<AppState>,
    body: Bytes
) -> ApiResult<(StatusCode, Json<Value>)> {
    let payload: ReindexRequest = if body.is_empty() {
        ReindexRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    };
    let job_id = state
        .jobs
        .enqueue_for_current(REINDEX_JOB, payload)
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "kind": REINDEX_JOB }))
    ))
}
