//! HTTP error surface for the gateway
//!
//! Wraps `shared::Error` so handlers can use `?` and let the classification
//! table drive the status code. Deliberate rejections (4xx) carry their
//! message in a `{"detail": ...}` body; server-side failures get a safe
//! generic body — internal details are logged by the error-handling stage,
//! never returned to the caller.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub shared::Error);

impl ApiError {
    pub fn status(&self) -> u16 {
        self.0.status_code()
    }

    pub fn error_type(&self) -> &'static str {
        self.0.error_type()
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            HttpResponse::build(status).json(json!({
                "error": {
                    "type": self.0.error_type(),
                    "message": "An unexpected error occurred"
                }
            }))
        } else {
            HttpResponse::build(status).json(json!({ "detail": self.0.to_string() }))
        }
    }
}

/// Classification key for errors that did not originate as a
/// `shared::Error` (framework errors, payload errors). Most specific
/// status first, everything unmapped is an internal failure.
pub fn classify_status(status: u16) -> &'static str {
    match status {
        400 | 422 => "ValidationError",
        401 => "AuthenticationError",
        403 => "AuthorizationError",
        404 => "NotFound",
        429 => "RateLimitExceeded",
        503 => "DependencyUnavailable",
        _ => "InternalServerError",
    }
}
