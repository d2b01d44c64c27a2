//! Request-processing pipeline
//!
//! Stages run in a fixed order, outermost first:
//!
//! 1. metrics          - counters and latency histograms around everything
//! 2. request logging  - request id, context capture, completion log
//! 3. security         - response headers and CORS
//! 4. validation       - structural request checks (cheap rejects first)
//! 5. compression      - actix's built-in `Compress`
//! 6. error boundary   - structured errors, aggregation, notifications
//! 7. rate limiting    - fixed-window limiter over the shared store
//! 8. caching          - fingerprint-keyed response replay
//! 9. authentication   - bearer-token enforcement per route policy
//!
//! A stage that rejects produces the terminal response itself; inner
//! stages never see the request. actix wraps in reverse registration
//! order, so `main` registers the auth guard first and metrics last.

pub mod auth;
pub mod cache;
pub mod error_handler;
pub mod metrics;
pub mod rate_limiter;
pub mod request_logger;
pub mod security;
pub mod validation;

pub use auth::{resolve_identity, AuthGuard, Claims, Identity};
pub use cache::CacheStage;
pub use error_handler::ErrorBoundary;
pub use metrics::{init_metrics, metrics_handler, RequestMetrics};
pub use rate_limiter::RateLimitStage;
pub use request_logger::{client_ip, RequestContext, RequestLogger};
pub use security::{cors, SecurityConfig, SecurityHeaders};
pub use validation::RequestValidation;
