//! Metrics stage
//!
//! First stage in the chain so rejected requests are counted too. Records
//! per-request Prometheus series:
//!
//! - `http_requests_total{method, path, status}` counter
//! - `http_request_duration_seconds{method, path, status}` histogram
//! - `http_requests_in_flight` gauge
//!
//! Dynamic path segments are normalized to `{id}` to keep label
//! cardinality bounded. The `/metrics` endpoint itself is excluded.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::{
    future::{ready, Ready},
    time::Instant,
};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Call once at startup, before any
/// metric is recorded; safe to call again (tests share one process).
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder");

            describe_counter!("http_requests_total", "Total HTTP requests processed");
            describe_histogram!(
                "http_request_duration_seconds",
                "HTTP request duration in seconds"
            );
            describe_gauge!(
                "http_requests_in_flight",
                "HTTP requests currently being processed"
            );

            handle
        })
        .clone()
}

/// Handler for the `/metrics` endpoint (Prometheus text format).
pub async fn metrics_handler() -> HttpResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not initialized"),
    }
}

/// Replace numeric and UUID path segments with `{id}`.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let is_numeric = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
            let is_uuid =
                segment.len() == 36 && segment.chars().filter(|c| *c == '-').count() == 4;
            if is_numeric || is_uuid {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Request metrics middleware
pub struct RequestMetrics;

impl RequestMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsMiddleware { service }))
    }
}

pub struct RequestMetricsMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsMiddleware<S>
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
        let excluded = req.path() == "/metrics";
        let method = req.method().to_string();
        let path = normalize_path(req.path());
        let start = Instant::now();

        if !excluded {
            gauge!("http_requests_in_flight").increment(1.0);
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            if excluded {
                return result;
            }

            gauge!("http_requests_in_flight").decrement(1.0);

            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(e) => e.as_response_error().status_code().as_u16(),
            };
            let status = status.to_string();
            let duration = start.elapsed().as_secs_f64();

            counter!(
                "http_requests_total",
                "method" => method.clone(),
                "path" => path.clone(),
                "status" => status.clone()
            )
            .increment(1);
            histogram!(
                "http_request_duration_seconds",
                "method" => method,
                "path" => path,
                "status" => status
            )
            .record(duration);

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, web, App};

    async fn handler() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    #[test]
    fn test_normalize_numeric_segment() {
        assert_eq!(normalize_path("/api/v1/products/42"), "/api/v1/products/{id}");
    }

    #[test]
    fn test_normalize_uuid_segment() {
        assert_eq!(
            normalize_path("/api/v1/orders/123e4567-e89b-12d3-a456-426614174000"),
            "/api/v1/orders/{id}"
        );
    }

    #[test]
    fn test_normalize_static_path_unchanged() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[actix_web::test]
    async fn test_middleware_passes_requests_through() {
        init_metrics();

        let app = actix_test::init_service(
            App::new()
                .wrap(RequestMetrics::new())
                .route("/test", web::get().to(handler)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/test").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
