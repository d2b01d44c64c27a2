//! Route configuration and per-route pipeline policy
//!
//! Every enforcement stage consults an explicit route-metadata table
//! instead of attribute reflection: `policy_for(path)` answers whether a
//! route skips authentication or rate limiting, whether its responses are
//! cacheable, and whether cached variants must be partitioned by identity.
//! Exempt stages still run for observability; they only skip enforcement.

use crate::handlers;
use crate::middleware::metrics::metrics_handler;
use actix_web::web;

/// Pipeline policy for one route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Skip bearer-token enforcement
    pub auth_exempt: bool,
    /// Never enters the rate-limit counting path
    pub rate_limit_exempt: bool,
    /// GET responses may be served from and stored into the cache
    pub cacheable: bool,
    /// Cached variants must include the resolved identity in the
    /// fingerprint; a hit can then never cross users
    pub identity_sensitive: bool,
}

impl RoutePolicy {
    /// Default for any route not listed: authenticated, counted,
    /// never cached.
    pub const fn protected() -> Self {
        Self {
            auth_exempt: false,
            rate_limit_exempt: false,
            cacheable: false,
            identity_sensitive: false,
        }
    }

    /// Infrastructure endpoints: always reachable, never counted.
    pub const fn infrastructure() -> Self {
        Self {
            auth_exempt: true,
            rate_limit_exempt: true,
            cacheable: false,
            identity_sensitive: false,
        }
    }
}

/// Look up the pipeline policy for a request path.
pub fn policy_for(path: &str) -> RoutePolicy {
    // Health, version and metrics must return while the process is up,
    // regardless of store availability, and are never throttled.
    if path == "/api/v1/health"
        || path == "/api/v1/version"
        || path == "/metrics"
        || path.starts_with("/static/")
        || path.starts_with("/public/")
    {
        return RoutePolicy::infrastructure();
    }

    // Public catalogue reads: rate-limited per IP, cacheable for everyone.
    if path.starts_with("/api/v1/products") || path.starts_with("/api/v1/stock") {
        return RoutePolicy {
            auth_exempt: true,
            rate_limit_exempt: false,
            cacheable: true,
            identity_sensitive: false,
        };
    }

    // Account state: cacheable only per identity.
    if path.starts_with("/api/v1/balance") {
        return RoutePolicy {
            auth_exempt: false,
            rate_limit_exempt: false,
            cacheable: true,
            identity_sensitive: true,
        };
    }

    RoutePolicy::protected()
}

/// Configure all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(handlers::health::health_check))
                .route("/version", web::get().to(handlers::health::version))
                .service(
                    web::scope("/admin")
                        .route("/cache/invalidate", web::post().to(handlers::admin::invalidate_cache)),
                ),
        );
    // Business-domain scopes (auth, balance, stock, transactions, products)
    // mount here; they are owned by their own modules.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_paths_are_fully_exempt() {
        for path in ["/api/v1/health", "/api/v1/version", "/metrics", "/static/app.css"] {
            let policy = policy_for(path);
            assert!(policy.auth_exempt, "{path} should skip auth");
            assert!(policy.rate_limit_exempt, "{path} should skip rate limiting");
            assert!(!policy.cacheable);
        }
    }

    #[test]
    fn test_unknown_paths_are_protected() {
        let policy = policy_for("/api/v1/transactions");
        assert_eq!(policy, RoutePolicy::protected());
    }

    #[test]
    fn test_catalogue_is_cacheable_and_counted() {
        let policy = policy_for("/api/v1/products");
        assert!(policy.auth_exempt);
        assert!(!policy.rate_limit_exempt);
        assert!(policy.cacheable);
        assert!(!policy.identity_sensitive);
    }

    #[test]
    fn test_balance_cache_is_identity_partitioned() {
        let policy = policy_for("/api/v1/balance");
        assert!(!policy.auth_exempt);
        assert!(policy.cacheable);
        assert!(policy.identity_sensitive);
    }
}
