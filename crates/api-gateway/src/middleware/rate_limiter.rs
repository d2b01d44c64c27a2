//! Rate-limiting stage
//!
//! Consults the shared fixed-window limiter before the request reaches
//! caching or handlers. Denied requests short-circuit with 429 and the
//! standard `X-RateLimit-*` trio plus `Retry-After`; allowed requests get
//! the same trio stamped on the way out so clients can pace themselves.

use crate::{
    middleware::{auth::resolve_identity, request_logger::client_ip},
    routes::policy_for,
};
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use serde_json::json;
use shared::{RateLimitDecision, RateLimiter, ANONYMOUS};
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};
use tracing::warn;

/// Rate-limiting middleware
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    secret: Rc<String>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, secret: impl Into<String>) -> Self {
        Self {
            limiter,
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitStage
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            secret: self.secret.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
    secret: Rc<String>,
}

fn stamp_headers<B>(res: &mut ServiceResponse<B>, decision: &RateLimitDecision) {
    let headers = res.headers_mut();
    if let Ok(v) = header::HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-remaining"), v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-reset"), v);
    }
    if decision.degraded {
        headers.insert(
            header::HeaderName::from_static("x-ratelimit-status"),
            header::HeaderValue::from_static("degraded"),
        );
    }
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
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
        let limiter = self.limiter.clone();
        let secret = self.secret.clone();

        Box::pin(async move {
            let policy = policy_for(req.path());
            if policy.rate_limit_exempt {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let user = resolve_identity(&req, &secret).unwrap_or_else(|| ANONYMOUS.to_string());
            let ip = client_ip(&req);
            let endpoint = req.path().to_string();

            let decision = limiter.check_and_consume(&user, &endpoint, &ip).await;

            if !decision.allowed {
                warn!(
                    user = %user,
                    endpoint = %endpoint,
                    client_ip = %ip,
                    limit = decision.limit,
                    reset_at = decision.reset_at,
                    "Rate limit exceeded"
                );
                let retry_after = decision.retry_after(chrono::Utc::now().timestamp());
                let response = HttpResponse::TooManyRequests()
                    .insert_header((header::RETRY_AFTER, retry_after.to_string()))
                    .json(json!({
                        "error": "Too Many Requests",
                        "reset": decision.reset_at,
                        "limit": decision.limit,
                        "remaining": 0,
                        "retry_after": retry_after,
                    }));
                let mut res = req.into_response(response).map_into_right_body();
                stamp_headers(&mut res, &decision);
                return Ok(res);
            }

            let res = service.call(req).await?;
            let mut res = res.map_into_left_body();
            stamp_headers(&mut res, &decision);
            Ok(res)
        })
    }
}
