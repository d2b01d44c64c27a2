//! Shared library for the storefront API backend
//!
//! This crate provides the engines and infrastructure the gateway's
//! middleware pipeline is built on:
//! - Key-value store abstraction (Redis or in-process)
//! - Fixed-window rate limiting
//! - Error aggregation and escalation
//! - Response caching by request fingerprint
//! - Error taxonomy and classification
//! - Configuration management
//! - Logging infrastructure

pub mod cache;
pub mod config;
pub mod error;
pub mod error_tracker;
pub mod rate_limit;
pub mod store;

// Re-export commonly used types
pub use cache::{fingerprint, CacheEntry, ResponseCache};
pub use config::{Config, StoreBackend};
pub use error::{Error, Result};
pub use error_tracker::{
    ErrorAggregator, ErrorContext, ErrorNotification, LogNotifier, NotificationChannel,
};
pub use rate_limit::{RateLimitDecision, RateLimiter, ANONYMOUS};
pub use store::{KeyValueStore, MemoryStore, RedisStore};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,api_gateway=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
