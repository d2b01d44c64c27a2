//! Logging stage
//!
//! Runs immediately after metrics so every request is observed, including
//! ones a later stage rejects. Assigns the request identifier (honoring an
//! inbound `X-Request-ID` for distributed tracing), builds the per-request
//! context the rest of the pipeline reads from extensions, and logs one
//! completion line with status and latency.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use chrono::{DateTime, Utc};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    net::SocketAddr,
    rc::Rc,
    time::Instant,
};
use tracing::info;
use uuid::Uuid;

/// Per-request context, owned by the pipeline invocation.
///
/// Created here, read by the error-handling, rate-limiting and caching
/// stages, dropped when the response is sent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub arrived_at: DateTime<Utc>,
}

/// Extract the client IP, honoring proxy headers actix resolved.
pub fn client_ip(req: &ServiceRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(strip_port)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Drop the port from `host:port` and `[v6]:port` forms; bare addresses
/// (including unbracketed IPv6 from forwarding headers) pass through.
fn strip_port(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(sock) => sock.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

/// Request logging middleware
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
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

        Box::pin(async move {
            let start = Instant::now();

            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let context = RequestContext {
                request_id: request_id.clone(),
                method: req.method().to_string(),
                path: req.path().to_string(),
                client_ip: client_ip(&req),
                arrived_at: Utc::now(),
            };
            req.extensions_mut().insert(context.clone());

            let mut res = service.call(req).await?;

            info!(
                request_id = %request_id,
                method = %context.method,
                path = %context.path,
                client_ip = %context.client_ip,
                status = res.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );

            if let Ok(value) = HeaderValue::try_from(request_id.as_str()) {
                res.headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }

            Ok(res)
        })
    }
}
