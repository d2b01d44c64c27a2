use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use api_gateway::middleware::{
    init_metrics, AuthGuard, CacheStage, ErrorBoundary, RateLimitStage, RequestLogger,
    RequestMetrics, RequestValidation, SecurityConfig, SecurityHeaders,
};
use api_gateway::routes;
use shared::{
    Config, ErrorAggregator, KeyValueStore, LogNotifier, MemoryStore, NotificationChannel,
    RateLimiter, RedisStore, ResponseCache, StoreBackend,
};
use std::sync::Arc;
use tracing::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    shared::init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Redis => {
            let redis = RedisStore::connect(&config.store.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            info!(url = %config.store.redis_url, "Using Redis store");
            Arc::new(redis)
        }
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        store.clone(),
        config.rate_limit.limit,
        config.rate_limit.window_seconds,
    ));
    let aggregator = Arc::new(ErrorAggregator::new(
        config.error_tracking.window_seconds,
        config.error_tracking.threshold,
    ));
    let channel: Arc<dyn NotificationChannel> = Arc::new(LogNotifier);
    let cache = Arc::new(ResponseCache::new(
        store.clone(),
        config.cache.ttl_seconds,
        config.cache.enabled,
    ));

    init_metrics();

    let jwt_secret = config.auth.jwt_secret.clone();
    let security = SecurityConfig::default();
    let bind = (config.server.host.clone(), config.server.port);
    info!(host = %config.server.host, port = config.server.port, "Starting API gateway");

    HttpServer::new(move || {
        // wrap() nests: the last registered stage runs outermost.
        App::new()
            .wrap(AuthGuard::new(jwt_secret.clone()))
            .wrap(CacheStage::new(cache.clone(), jwt_secret.clone()))
            .wrap(RateLimitStage::new(limiter.clone(), jwt_secret.clone()))
            .wrap(ErrorBoundary::new(aggregator.clone(), channel.clone()))
            .wrap(Compress::default())
            .wrap(RequestValidation)
            .wrap(api_gateway::middleware::cors())
            .wrap(SecurityHeaders::new(security.clone()))
            .wrap(RequestLogger)
            .wrap(RequestMetrics)
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(cache.clone()))
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
