use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response}
};
use context::JobError;
use errors::{StorageError, TenancyError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

const NOT_FOUND_MESSAGE: &str = "Company not found";
const MISMATCH_MESSAGE: &str = "You do not have access to this company";
const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Internal error: {0}")]
    InternalError(String)
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Tenancy(err) => tenancy_status(err),
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::QueueFull) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Job(JobError::Tenancy(err)) => tenancy_status(err),
            ApiError::Job(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn error_code(&self) -> String {
        match self {
            ApiError::Tenancy(err) | ApiError::Job(JobError::Tenancy(err)) => tenancy_code(err),
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Job(JobError::QueueFull) => "JOB_QUEUE_FULL",
            ApiError::Job(_) | ApiError::InternalError(_) => "INTERNAL_ERROR"
        }
        .to_string()
    }

    /// The message shown to the caller. Internal details never leave the
    /// process; they are logged instead.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Tenancy(err) | ApiError::Job(JobError::Tenancy(err)) => tenancy_message(err),
            ApiError::Job(JobError::QueueFull) => "Background queue is busy, retry later".to_string(),
            ApiError::Job(_) | ApiError::InternalError(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string()
        }
    }
}

fn tenancy_status(err: &TenancyError) -> StatusCode {
    match err {
        TenancyError::TenantNotFound { .. } => StatusCode::NOT_FOUND,
        TenancyError::TenantInactive { .. }
        | TenancyError::TenantMismatch { .. }
        | TenancyError::CrossTenantWrite { .. } => StatusCode::FORBIDDEN,
        TenancyError::AmbiguousAlias { .. } => StatusCode::CONFLICT,
        TenancyError::Validation { .. } | TenancyError::Resolver(_) => StatusCode::BAD_REQUEST,
        TenancyError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
        TenancyError::Storage(StorageError::Conflict { .. }) => StatusCode::CONFLICT,
        TenancyError::NoTenantActive { .. } | TenancyError::Context(_) | TenancyError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn tenancy_code(err: &TenancyError) -> &'static str {
    match err {
        TenancyError::TenantNotFound { .. } => "TENANT_NOT_FOUND",
        TenancyError::TenantInactive { reason, .. } => match reason {
            errors::InactiveReason::Suspended => "TENANT_SUSPENDED",
            errors::InactiveReason::Cancelled => "TENANT_CANCELLED",
            errors::InactiveReason::Expired => "TENANT_EXPIRED",
            errors::InactiveReason::Inactive => "TENANT_INACTIVE"
        },
        TenancyError::TenantMismatch { .. } => "TENANT_MISMATCH",
        TenancyError::CrossTenantWrite { .. } => "CROSS_TENANT_WRITE",
        TenancyError::AmbiguousAlias { .. } => "ALIAS_TAKEN",
        TenancyError::Validation { .. } => "INVALID_REQUEST",
        TenancyError::Resolver(_) => "MALFORMED_HOST",
        TenancyError::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
        TenancyError::Storage(StorageError::Conflict { .. }) => "CONFLICT",
        TenancyError::NoTenantActive { .. } | TenancyError::Context(_) | TenancyError::Storage(_) => {
            "INTERNAL_ERROR"
        }
    }
}

fn tenancy_message(err: &TenancyError) -> String {
    match err {
        TenancyError::TenantNotFound { .. } => NOT_FOUND_MESSAGE.to_string(),
        TenancyError::TenantInactive { reason, .. } => reason.message().to_string(),
        TenancyError::TenantMismatch { .. } | TenancyError::CrossTenantWrite { .. } => {
            MISMATCH_MESSAGE.to_string()
        }
        TenancyError::AmbiguousAlias { alias, .. } => format!("{alias} is already taken"),
        TenancyError::Validation { field, reason } => format!("{field}: {reason}"),
        TenancyError::Resolver(inner) => inner.to_string(),
        TenancyError::Storage(StorageError::NotFound { .. }) => "Not found".to_string(),
        TenancyError::Storage(StorageError::Conflict { id, .. }) => format!("{id} already exists"),
        TenancyError::NoTenantActive { .. } | TenancyError::Context(_) | TenancyError::Storage(_) => {
            INTERNAL_MESSAGE.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use errors::InactiveReason;

    #[test]
    fn test_boundary_mapping() {
        let cases = [
            (
                ApiError::from(TenancyError::TenantNotFound {
                    host: "ghost.example.com".to_string()
                }),
                StatusCode::NOT_FOUND,
                "TENANT_NOT_FOUND"
            ),
            (
                ApiError::from(TenancyError::TenantInactive {
                    tenant_id: "acme".to_string(),
                    reason: InactiveReason::Expired
                }),
                StatusCode::FORBIDDEN,
                "TENANT_EXPIRED"
            ),
            (
                ApiError::from(TenancyError::TenantMismatch {
                    user_id: "u".to_string(),
                    tenant_id: "acme".to_string()
                }),
                StatusCode::FORBIDDEN,
                "TENANT_MISMATCH"
            ),
            (
                ApiError::from(TenancyError::NoTenantActive {
                    record_type: "products".to_string()
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR"
            ),
            (ApiError::Unauthenticated, StatusCode::UNAUTHORIZED, "UNAUTHENTICATED")
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "{err:?}");
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_not_found_message_is_fixed() {
        let err = ApiError::from(TenancyError::TenantNotFound {
            host: "ghost.example.com".to_string()
        });
        assert_eq!(err.public_message(), "Company not found");
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = ApiError::from(TenancyError::NoTenantActive {
            record_type: "products".to_string()
        });
        assert_eq!(err.public_message(), "Internal server error");
        assert!(!err.public_message().contains("products"));
    }
}
