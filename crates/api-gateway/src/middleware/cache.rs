//! Response-caching stage
//!
//! Runs after rate limiting and before authentication. A hit replays the
//! stored status, headers, and body without touching the handler; identity
//! is part of the fingerprint for identity-sensitive routes, so a hit never
//! crosses users. Only successful (200) GET responses on routes marked
//! cacheable are stored.

use crate::{middleware::auth::resolve_identity, routes::policy_for};
use actix_web::{
    body::{to_bytes, EitherBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorInternalServerError,
    http::{header, Method, StatusCode},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use shared::{fingerprint, CacheEntry, ResponseCache, ANONYMOUS};
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};
use tracing::debug;

/// Headers whose value participates in the fingerprint.
const VARY_HEADERS: [header::HeaderName; 2] = [header::ACCEPT, header::ACCEPT_ENCODING];

/// Response headers replayed on a hit.
const REPLAYED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::CACHE_CONTROL];

/// Caching middleware
pub struct CacheStage {
    cache: Arc<ResponseCache>,
    secret: Rc<String>,
}

impl CacheStage {
    pub fn new(cache: Arc<ResponseCache>, secret: impl Into<String>) -> Self {
        Self {
            cache,
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CacheStage
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CacheMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CacheMiddleware {
            service: Rc::new(service),
            cache: self.cache.clone(),
            secret: self.secret.clone(),
        }))
    }
}

pub struct CacheMiddleware<S> {
    service: Rc<S>,
    cache: Arc<ResponseCache>,
    secret: Rc<String>,
}

fn request_fingerprint(req: &ServiceRequest, identity: Option<&str>) -> String {
    let vary: Vec<(&str, &str)> = VARY_HEADERS
        .iter()
        .filter_map(|name| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.as_str(), v))
        })
        .collect();

    fingerprint(
        req.method().as_str(),
        req.path(),
        req.query_string(),
        &vary,
        identity,
    )
}

fn replay<B>(req: ServiceRequest, entry: CacheEntry, body: Vec<u8>) -> ServiceResponse<EitherBody<B>> {
    let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &entry.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.insert_header(("x-cache", "HIT"));
    req.into_response(builder.body(body)).map_into_right_body()
}

impl<S, B> Service<ServiceRequest> for CacheMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let cache = self.cache.clone();
        let secret = self.secret.clone();

        Box::pin(async move {
            let policy = policy_for(req.path());
            let eligible = cache.is_enabled() && req.method() == Method::GET && policy.cacheable;
            if !eligible {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let identity = if policy.identity_sensitive {
                Some(resolve_identity(&req, &secret).unwrap_or_else(|| ANONYMOUS.to_string()))
            } else {
                None
            };
            let key = request_fingerprint(&req, identity.as_deref());

            if let Some(entry) = cache.get(&key).await {
                if let Some(body) = entry.body_bytes() {
                    debug!(path = %req.path(), "Serving cached response");
                    return Ok(replay(req, entry, body));
                }
            }

            let res = service.call(req).await?;
            if res.status() != StatusCode::OK {
                return Ok(res.map_into_left_body());
            }

            let status = res.status();
            let stored_headers: Vec<(String, String)> = REPLAYED_HEADERS
                .iter()
                .filter_map(|name| {
                    res.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| (name.to_string(), v.to_string()))
                })
                .collect();
            let all_headers: Vec<_> = res
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();

            // Buffering the body consumes the response; the stored entry and
            // the rebuilt response share the same bytes, so a later hit
            // replays exactly what this caller received.
            let (http_req, http_res) = res.into_parts();
            let bytes = to_bytes(http_res.into_body())
                .await
                .map_err(|_| ErrorInternalServerError("Failed to buffer response body"))?;

            let entry = CacheEntry::new(status.as_u16(), stored_headers, &bytes);
            cache.put(&key, &entry).await;

            // The current caller gets every handler-set header back; only the
            // replay whitelist goes into the stored entry.
            let mut builder = HttpResponse::build(status);
            for (name, value) in all_headers {
                builder.append_header((name, value));
            }
            builder.insert_header(("x-cache", "MISS"));
            let rebuilt = builder.body(bytes.to_vec());
            Ok(ServiceResponse::new(http_req, rebuilt).map_into_right_body())
        })
    }
}
