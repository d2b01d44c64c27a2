//! Admin endpoints
//!
//! Cache invalidation for operators: deletes every cached entry whose key
//! matches the supplied fingerprint prefix (empty prefix clears the whole
//! cache). The route sits behind the auth guard like any other protected
//! path.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use shared::ResponseCache;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    /// Fingerprint prefix to drop; empty clears everything
    #[serde(default)]
    pub prefix: String,
}

pub async fn invalidate_cache(
    cache: web::Data<Arc<ResponseCache>>,
    body: web::Json<InvalidateRequest>,
) -> HttpResponse {
    let removed = cache.invalidate(&body.prefix).await;
    info!(prefix = %body.prefix, removed, "Cache invalidated");
    HttpResponse::Ok().json(json!({ "invalidated": removed }))
}
