//! Error types for the application
//!
//! Every variant carries its classification: `status_code()` maps the error
//! to the HTTP status the gateway returns, and `error_type()` is the stable
//! key the error aggregation engine counts occurrences under.

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (malformed or unprocessable input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Not found errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: retry after {retry_after}s")]
    RateLimited {
        limit: i64,
        reset_at: i64,
        retry_after: i64,
    },

    /// The backing key-value store is unreachable. Dependents degrade
    /// (fail-open for rate limiting, fail-through for caching) instead of
    /// failing the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a Validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an Authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an Authorization error
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Create a NotFound error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a StoreUnavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create an Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for this error.
    ///
    /// Most specific classification first; anything unmapped is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 422,
            Error::Authentication(_) => 401,
            Error::Authorization(_) => 403,
            Error::NotFound { .. } => 404,
            Error::RateLimited { .. } => 429,
            Error::StoreUnavailable(_) => 503,
            Error::Config(_) | Error::Internal(_) => 500,
        }
    }

    /// Stable classification key used by the error aggregation engine.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Validation(_) => "ValidationError",
            Error::Authentication(_) => "AuthenticationError",
            Error::Authorization(_) => "AuthorizationError",
            Error::NotFound { .. } => "NotFound",
            Error::RateLimited { .. } => "RateLimitExceeded",
            Error::StoreUnavailable(_) => "DependencyUnavailable",
            Error::Internal(_) => "InternalServerError",
        }
    }

    /// Whether this is a server-side failure (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
