use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use tenant_core::{Principal, TenantId, UserId};
use tracing::debug;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const HOME_TENANT_HEADER: &str = "x-tenant-id";
pub const DISPLAY_NAME_HEADER: &str = "x-user-name";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Principal asserted by the identity collaborator in front of this service.
///
/// Both the user id and the home tenant must be present and well-formed;
/// anything else is treated as anonymous.
pub fn principal_from_headers(headers: &HeaderMap) -> Option<Principal> {
    let user_id = UserId::new(header(headers, USER_ID_HEADER)?.to_string())?;
    let home_tenant_id = TenantId::new(header(headers, HOME_TENANT_HEADER)?.to_string())?;

    Some(Principal {
        user_id,
        home_tenant_id,
        display_name: header(headers, DISPLAY_NAME_HEADER).map(ToString::to_string)
    })
}

pub async fn principal_middleware(mut request: Request, next: Next) -> Response {
    if let Some(principal) = principal_from_headers(request.headers()) {
        debug!(user_id = %principal.user_id, "Authenticated principal");
        request.extensions_mut().insert(principal);
    }

    next.run(request).await
}
