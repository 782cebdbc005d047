//! Request boundary: resolve the tenant, run the access gate and execute the
//! rest of the stack inside a fresh tenant execution.

use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response}
};
use context::{Authorized, GateState, NoTenantReason, Resolution, TenantContext, TenantGate};
use errors::TenancyError;
use tenant_core::Principal;
use tracing::{Instrument, debug, error, info_span};

use crate::errors::ApiError;
use crate::state::AppState;

fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))
}

pub async fn tenant_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let Some(host) = request_host(&request) else {
        if state.resolver.is_tenant_free(&path) {
            return TenantContext::scope(next.run(request)).await;
        }
        return ApiError::InvalidRequest("missing Host header".to_string()).into_response();
    };
    let principal = request.extensions().get::<Principal>().cloned();

    let resolution = match state.resolver.resolve(&host, &path, principal.as_ref()).await {
        Ok(resolution) => resolution,
        Err(err) => return ApiError::from(err).into_response()
    };
    let matched_by = match &resolution {
        Resolution::Tenant { matched_by, .. } => matched_by.as_str(),
        Resolution::NoTenant(_) => "none"
    };

    let gate = TenantGate::new(state.verifier).resolve(resolution);
    if let GateState::NoTenant(reason) = gate.state() {
        if *reason == NoTenantReason::TenantFreePath {
            return TenantContext::scope(next.run(request)).await;
        }
        debug!(host = %host, path = %path, reason = reason.as_str(), "No tenant for tenant-required path");
        return ApiError::from(TenancyError::TenantNotFound { host }).into_response();
    }

    let gate = gate.verify_active();
    let Some(principal) = principal else {
        // Anonymous callers still learn the account status; otherwise they
        // must authenticate.
        let err = if matches!(gate.state(), GateState::Rejected { .. }) {
            gate.finish(&host)
                .err()
                .map_or(ApiError::Unauthenticated, ApiError::from)
        } else {
            ApiError::Unauthenticated
        };
        return err.into_response();
    };

    match gate.verify_principal(&principal).finish(&host) {
        Ok(authorized) => run_authorized(authorized, matched_by, request, next).await,
        Err(err) => ApiError::from(err).into_response()
    }
}

async fn run_authorized(
    authorized: Authorized,
    matched_by: &'static str,
    mut request: Request,
    next: Next
) -> Response {
    let span = info_span!(
        "tenant_request",
        tenant_id = %authorized.tenant.id,
        user_id = %authorized.principal.user_id,
        matched_by
    );

    TenantContext::scope(async move {
        let guard = match TenantContext::enter(authorized.tenant.clone()) {
            Ok(guard) => guard,
            Err(err) => return ApiError::from(TenancyError::from(err)).into_response()
        };
        request.extensions_mut().insert(authorized);

        let response = next.run(request).await;

        if let Err(err) = guard.exit() {
            error!(error = %err, "Failed to exit tenant context");
        }
        response
    })
    .instrument(span)
    .await
}
