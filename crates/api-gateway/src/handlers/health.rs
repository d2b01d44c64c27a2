//! Health and version endpoints
//!
//! Health always answers 200 while the process is up; the store's state is
//! reported in the body rather than the status so orchestrators do not
//! recycle the gateway when only the backing store is down (the pipeline
//! itself degrades gracefully).

use actix_web::{web, HttpResponse};
use serde_json::json;
use shared::KeyValueStore;
use std::sync::Arc;
use tracing::warn;

pub async fn health_check(store: web::Data<Arc<dyn KeyValueStore>>) -> HttpResponse {
    let store_status = match store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Health check: store unreachable");
            "unavailable"
        }
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "store": store_status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn version() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};
    use async_trait::async_trait;
    use shared::MemoryStore;

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _: &str) -> shared::Result<Option<String>> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn set(&self, _: &str, _: &str, _: u64) -> shared::Result<()> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn incr(&self, _: &str) -> shared::Result<i64> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn expire(&self, _: &str, _: u64) -> shared::Result<()> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn delete(&self, _: &str) -> shared::Result<()> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn delete_prefix(&self, _: &str) -> shared::Result<u64> {
            Err(shared::Error::store_unavailable("down"))
        }
        async fn ping(&self) -> shared::Result<()> {
            Err(shared::Error::store_unavailable("down"))
        }
    }

    #[actix_web::test]
    async fn test_health_reports_connected_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "connected");
    }

    #[actix_web::test]
    async fn test_health_stays_200_with_store_down() {
        let store: Arc<dyn KeyValueStore> = Arc::new(DownStore);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["store"], "unavailable");
    }

    #[actix_web::test]
    async fn test_version_reports_package_metadata() {
        let app =
            test::init_service(App::new().route("/version", web::get().to(version))).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/version").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
