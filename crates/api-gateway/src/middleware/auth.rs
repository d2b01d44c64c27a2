//! Authentication stage
//!
//! Last stage in the chain: earlier stages (health checks, static assets,
//! public catalogue reads) may be exempted per route, and the rate limiter
//! must count a request whether or not it would authenticate. Enforcement
//! consults the route-metadata table; exempt routes still resolve identity
//! for observability.
//!
//! Identity resolution (a non-enforcing bearer-token peek) also serves the
//! rate-limiting and caching stages, which run earlier and key on the
//! resolved user.

use crate::routes::policy_for;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    future::{ready, Ready},
    rc::Rc,
};
use tracing::{debug, warn};

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to
    pub sub: String,
    /// Expiry (unix timestamp), enforced by the decoder
    pub exp: usize,
}

/// Resolved identity, stored in request extensions by the auth stage.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

/// Resolve the caller's identity from the Authorization header.
///
/// Non-enforcing: a missing or invalid token yields `None` and the caller
/// decides what that means (the rate limiter falls back to the anonymous
/// sentinel; the auth stage rejects).
pub fn resolve_identity(req: &ServiceRequest, secret: &str) -> Option<String> {
    let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;

    let key = DecodingKey::from_secret(secret.as_bytes());
    match decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)) {
        Ok(data) => Some(data.claims.sub),
        Err(e) => {
            debug!(error = %e, "Bearer token failed verification");
            None
        }
    }
}

/// Authentication middleware
pub struct AuthGuard {
    secret: Rc<String>,
}

impl AuthGuard {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthGuardMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthGuardMiddleware {
            service: Rc::new(service),
            secret: self.secret.clone(),
        }))
    }
}

pub struct AuthGuardMiddleware<S> {
    service: Rc<S>,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthGuardMiddleware<S>
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
        let secret = self.secret.clone();

        Box::pin(async move {
            let policy = policy_for(req.path());
            let identity = resolve_identity(&req, &secret);

            if let Some(user) = &identity {
                req.extensions_mut().insert(Identity(user.clone()));
            }

            if policy.auth_exempt {
                debug!(
                    path = %req.path(),
                    identity = identity.as_deref().unwrap_or(shared::ANONYMOUS),
                    "Auth-exempt route, skipping enforcement"
                );
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            if identity.is_none() {
                warn!(path = %req.path(), "Rejecting unauthenticated request");
                let response = HttpResponse::Unauthorized()
                    .insert_header((header::WWW_AUTHENTICATE, "Bearer"))
                    .json(json!({ "detail": "Missing or invalid authentication token" }));
                return Ok(req.into_response(response).map_into_right_body());
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
