//! API error responses.
//!
//! Handlers and pipeline stages accumulate structured messages in an
//! [`ErrorReport`]; the report serializes to the JSON error body and the
//! status comes either from `_http_resp_code` set by an inner stage or
//! from the handler itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use vodvault_common::report::section;
use vodvault_common::{Error, ErrorReport};

/// Error response carrying a status and the structured report body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub report: ErrorReport,
}

impl ApiError {
    /// Single-section error.
    pub fn new(status: StatusCode, sect: &str, msg: impl Into<String>) -> Self {
        let mut report = ErrorReport::new();
        report.set(sect, msg);
        Self { status, report }
    }

    /// Build from a report, preferring the status an inner stage recorded.
    pub fn from_report(report: ErrorReport, fallback: StatusCode) -> Self {
        let status = report
            .status()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(fallback);
        Self { status, report }
    }

    pub fn bad_request(sect: &str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, sect, msg)
    }

    pub fn not_found(sect: &str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, sect, msg)
    }

    pub fn forbidden(sect: &str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, sect, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, section::REASON, "missing or invalid credentials")
    }

    pub fn service_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            section::INTERNAL,
            "temporarily unavailable",
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, section::INTERNAL, msg)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_unavailable() {
            tracing::error!("database unavailable: {err}");
            Self::service_unavailable()
        } else {
            match err {
                Error::NotFound(msg) => Self::not_found(section::REASON, msg),
                Error::InvalidInput(msg) => Self::bad_request(section::REASON, msg),
                Error::Io(e) => Self::internal(e.to_string()),
                Error::Internal(msg) => Self::internal(msg),
                // covered by the is_unavailable branch
                Error::Database(_) | Error::PoolBusy => Self::service_unavailable(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.report)).into_response()
    }
}

/// Result alias for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_report_prefers_inner_status() {
        let mut report = ErrorReport::new();
        report.fail(section::RESOURCE_ID, "NOT allowed to use the ID", 403);
        let err = ApiError::from_report(report, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_common_error_mapping() {
        assert_eq!(
            ApiError::from(Error::PoolBusy).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(Error::database("statement failed")).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(Error::invalid_input("x")).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::not_found("resource")).status,
            StatusCode::NOT_FOUND
        );
    }
}
