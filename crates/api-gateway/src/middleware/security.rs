//! Security stage
//!
//! Adds security headers to every response and builds the CORS policy.
//! Runs early (after logging) so even rejected responses carry the
//! headers.
//!
//! - `X-Content-Type-Options: nosniff`
//! - `X-Frame-Options` (DENY by default)
//! - `Referrer-Policy`
//! - `Permissions-Policy` (browser features locked down)
//! - `Strict-Transport-Security` when HSTS is enabled
//!
//! HSTS is controlled by `ENABLE_HSTS` / `HSTS_MAX_AGE` and defaults to on
//! only in release builds.

use actix_cors::Cors;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http,
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    env,
    future::{ready, Ready},
    rc::Rc,
};

/// Security headers configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub enable_hsts: bool,
    pub hsts_max_age: u64,
    pub frame_options: String,
    pub referrer_policy: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let enable_hsts = env::var("ENABLE_HSTS")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(!cfg!(debug_assertions));

        let hsts_max_age = env::var("HSTS_MAX_AGE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(31_536_000);

        Self {
            enable_hsts,
            hsts_max_age,
            frame_options: "DENY".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
        }
    }
}

/// Security headers middleware
pub struct SecurityHeaders {
    config: Rc<SecurityConfig>,
}

impl SecurityHeaders {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config: Rc::new(config),
        }
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddleware {
            service: Rc::new(service),
            config: self.config.clone(),
        }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
    config: Rc<SecurityConfig>,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let mut res = service.call(req).await?;
            let headers = res.headers_mut();

            headers.insert(
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            );
            if let Ok(value) = HeaderValue::try_from(config.frame_options.as_str()) {
                headers.insert(HeaderName::from_static("x-frame-options"), value);
            }
            if let Ok(value) = HeaderValue::try_from(config.referrer_policy.as_str()) {
                headers.insert(HeaderName::from_static("referrer-policy"), value);
            }
            headers.insert(
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static(
                    "accelerometer=(), camera=(), geolocation=(), microphone=(), payment=()",
                ),
            );

            if config.enable_hsts {
                let hsts = format!("max-age={}; includeSubDomains", config.hsts_max_age);
                if let Ok(value) = HeaderValue::try_from(hsts) {
                    headers.insert(HeaderName::from_static("strict-transport-security"), value);
                }
            }

            Ok(res)
        })
    }
}

/// Configure CORS middleware.
///
/// `ALLOWED_ORIGINS` is a comma-separated whitelist; development builds
/// additionally allow localhost.
pub fn cors() -> Cors {
    let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
    let origins: Vec<String> = allowed_origins
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().to_string())
        .collect();

    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            if cfg!(debug_assertions)
                && (origin_str.starts_with("http://localhost")
                    || origin_str.starts_with("http://127.0.0.1"))
            {
                return true;
            }
            origins.iter().any(|allowed| origin_str == allowed)
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
        .allowed_headers(vec![
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
            http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}
