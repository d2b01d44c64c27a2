//! Error boundary
//!
//! Converts handler and downstream-stage errors into structured JSON
//! responses, tags each with a correlation id, and feeds server errors
//! into the aggregation engine. Full error details are logged server-side
//! only; 5xx bodies carry a generic message.

use crate::{
    error::{classify_status, ApiError},
    middleware::{auth::Identity, request_logger::RequestContext},
};
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpMessage, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use serde_json::json;
use shared::{ErrorAggregator, ErrorContext, NotificationChannel, ANONYMOUS};
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};
use tracing::error;
use uuid::Uuid;

/// Error-handling middleware
pub struct ErrorBoundary {
    aggregator: Arc<ErrorAggregator>,
    channel: Arc<dyn NotificationChannel>,
}

impl ErrorBoundary {
    pub fn new(aggregator: Arc<ErrorAggregator>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            aggregator,
            channel,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ErrorBoundary
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ErrorBoundaryMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ErrorBoundaryMiddleware {
            service: Rc::new(service),
            aggregator: self.aggregator.clone(),
            channel: self.channel.clone(),
        }))
    }
}

pub struct ErrorBoundaryMiddleware<S> {
    service: Rc<S>,
    aggregator: Arc<ErrorAggregator>,
    channel: Arc<dyn NotificationChannel>,
}

impl<S, B> Service<ServiceRequest> for ErrorBoundaryMiddleware<S>
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
        let aggregator = self.aggregator.clone();
        let channel = self.channel.clone();

        Box::pin(async move {
            // Handler and route errors surface as responses carrying the
            // original error; inspect the response rather than cloning the
            // request up front, which would poison actix's routing.
            let res = service.call(req).await?;

            let (status, error_type, detail) = match res.response().error() {
                None => return Ok(res.map_into_left_body()),
                Some(err) => match err.as_error::<ApiError>() {
                    Some(api_err) => (
                        api_err.status(),
                        api_err.error_type(),
                        api_err.to_string(),
                    ),
                    None => {
                        let status = err.as_response_error().status_code().as_u16();
                        (status, classify_status(status), err.to_string())
                    }
                },
            };

            let (http_req, _) = res.into_parts();
            let context = http_req.extensions().get::<RequestContext>().cloned();
            let identity = http_req
                .extensions()
                .get::<Identity>()
                .map(|i| i.0.clone())
                .unwrap_or_else(|| ANONYMOUS.to_string());

            let error_id = Uuid::new_v4();
            let method = http_req.method().to_string();
            let path = http_req.path().to_string();
            let client_ip = context
                .as_ref()
                .map(|c| c.client_ip.clone())
                .unwrap_or_else(|| "unknown".to_string());

            error!(
                error_id = %error_id,
                error_type,
                status,
                method = %method,
                path = %path,
                client_ip = %client_ip,
                identity = %identity,
                detail = %detail,
                "Request failed"
            );

            if status >= 500 {
                let ctx = ErrorContext {
                    method,
                    path,
                    client_ip,
                    identity,
                };
                if let Some(notification) = aggregator.record(error_type, status, &ctx) {
                    channel.notify(&notification).await;
                }
            }

            let body = if status >= 500 {
                json!({
                    "error": {
                        "type": error_type,
                        "message": "An unexpected error occurred",
                    }
                })
            } else {
                json!({ "detail": detail })
            };

            let status_code =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let response = HttpResponse::build(status_code)
                .insert_header(("x-error-id", error_id.to_string()))
                .insert_header(("x-error-type", error_type))
                .json(body);

            Ok(ServiceResponse::new(http_req, response).map_into_right_body())
        })
    }
}
