//! Validation stage
//!
//! Structural request checks that run before any expensive work: a request
//! that fails here never reaches rate limiting, caching or authentication.
//! Rejections are terminal responses built by this stage, not errors
//! propagated upward.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, Method, StatusCode},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use serde_json::json;
use std::{
    future::{ready, Ready},
    rc::Rc,
};
use tracing::warn;

/// Maximum accepted request body, in bytes (1 MiB)
const MAX_BODY_BYTES: u64 = 1_048_576;

/// Maximum accepted query string length
const MAX_QUERY_LEN: usize = 2_048;

/// What a request failed on
enum Rejection {
    /// Path traversal or control bytes
    MalformedPath,
    /// Declared body exceeds the cap
    BodyTooLarge,
    /// Body-bearing request without a JSON content type
    UnsupportedMediaType,
    /// Query string too long to process
    UnprocessableQuery,
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::MalformedPath => StatusCode::BAD_REQUEST,
            Rejection::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Rejection::UnprocessableQuery => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn detail(&self) -> &'static str {
        match self {
            Rejection::MalformedPath => "Invalid request path",
            Rejection::BodyTooLarge => "Request body too large",
            Rejection::UnsupportedMediaType => "Content-Type must be application/json",
            Rejection::UnprocessableQuery => "Query string too long",
        }
    }
}

fn validate(req: &ServiceRequest) -> Option<Rejection> {
    let path = req.path();
    if path.contains("..") || path.contains('\0') {
        return Some(Rejection::MalformedPath);
    }

    if req.query_string().len() > MAX_QUERY_LEN {
        return Some(Rejection::UnprocessableQuery);
    }

    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_BYTES {
        return Some(Rejection::BodyTooLarge);
    }

    let has_body = content_length > 0;
    let body_method = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    if has_body && body_method {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Some(Rejection::UnsupportedMediaType);
        }
    }

    None
}

/// Request validation middleware
pub struct RequestValidation;

impl RequestValidation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestValidation {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestValidation
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestValidationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestValidationMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestValidationMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestValidationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            if let Some(rejection) = validate(&req) {
                warn!(
                    path = %req.path(),
                    method = %req.method(),
                    status = rejection.status().as_u16(),
                    detail = rejection.detail(),
                    "Request rejected by validation"
                );

                let response = HttpResponse::build(rejection.status())
                    .json(json!({ "detail": rejection.detail() }));
                return Ok(req.into_response(response).map_into_right_body());
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
