//! Configuration management using environment variables
//!
//! # Security
//!
//! This module enforces security requirements for sensitive configuration:
//! - JWT_SECRET must be at least 32 characters (256 bits of entropy)
//! - Production mode rejects weak or default secrets
//! - Development mode warns but allows weaker secrets for testing

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Key-value store configuration
    pub store: StoreConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Error aggregation configuration
    pub error_tracking: ErrorTrackingConfig,

    /// Response cache configuration
    pub cache: CacheConfig,

    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,
}

/// Backend used for shared counters and cached responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StoreBackend {
    /// Redis over a shared connection manager (production)
    Redis,
    /// In-process map (development and tests; not shared across instances)
    Memory,
}

/// Key-value store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use
    pub backend: StoreBackend,

    /// Redis connection URL (ignored for the memory backend)
    pub redis_url: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window for a (user, endpoint, ip) key
    pub limit: i64,

    /// Fixed window length in seconds
    pub window_seconds: i64,
}

/// Error aggregation configuration
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ErrorTrackingConfig {
    /// Trailing aggregation window in seconds
    pub window_seconds: i64,

    /// Occurrences of one error type within the window that trigger a
    /// notification
    pub threshold: usize,
}

/// Response cache configuration
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
    /// Whether response caching is enabled
    pub enabled: bool,

    /// Entry TTL in seconds
    pub ttl_seconds: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer token verification
    pub jwt_secret: String,
}

/// Minimum acceptable JWT secret length (256 bits)
const MIN_JWT_SECRET_LEN: usize = 32;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every value has a development-friendly default except `JWT_SECRET`,
    /// which is required and length-checked.
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: parse_env("SERVER_PORT", 8080)?,
        };

        let backend = match env_or("STORE_BACKEND", "redis").to_lowercase().as_str() {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(Error::config(format!(
                    "Unknown STORE_BACKEND '{}' (expected 'redis' or 'memory')",
                    other
                )))
            }
        };

        let store = StoreConfig {
            backend,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379/0"),
        };

        let rate_limit = RateLimitConfig {
            limit: parse_env("RATE_LIMIT_REQUESTS", 100)?,
            window_seconds: parse_env("RATE_LIMIT_WINDOW_SECONDS", 60)?,
        };

        let error_tracking = ErrorTrackingConfig {
            window_seconds: parse_env("ERROR_AGGREGATION_WINDOW_SECONDS", 300)?,
            threshold: parse_env("ERROR_NOTIFICATION_THRESHOLD", 5)?,
        };

        let cache = CacheConfig {
            enabled: parse_env("CACHE_ENABLED", true)?,
            ttl_seconds: parse_env("CACHE_TTL_SECONDS", 900)?,
        };

        let auth = AuthConfig {
            jwt_secret: load_jwt_secret()?,
        };

        let config = Self {
            server,
            store,
            rate_limit,
            error_tracking,
            cache,
            auth,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.limit <= 0 {
            return Err(Error::config("RATE_LIMIT_REQUESTS must be positive"));
        }
        if self.rate_limit.window_seconds <= 0 {
            return Err(Error::config("RATE_LIMIT_WINDOW_SECONDS must be positive"));
        }
        if self.error_tracking.window_seconds <= 0 {
            return Err(Error::config(
                "ERROR_AGGREGATION_WINDOW_SECONDS must be positive",
            ));
        }
        if self.error_tracking.threshold == 0 {
            return Err(Error::config("ERROR_NOTIFICATION_THRESHOLD must be positive"));
        }
        Ok(())
    }
}

/// Load and validate the JWT secret.
fn load_jwt_secret() -> Result<String> {
    let secret =
        env::var("JWT_SECRET").map_err(|_| Error::config("JWT_SECRET must be set"))?;

    if secret.len() < MIN_JWT_SECRET_LEN {
        if cfg!(debug_assertions) {
            tracing::warn!(
                len = secret.len(),
                min = MIN_JWT_SECRET_LEN,
                "JWT_SECRET is shorter than recommended; allowed in development only"
            );
        } else {
            return Err(Error::config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )));
        }
    }

    Ok(secret)
}

/// Read an environment variable with a default
fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable with a default
fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("Invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}
