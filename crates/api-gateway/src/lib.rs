//! API gateway: the HTTP surface and its request-processing pipeline.
//!
//! Cross-cutting engines (rate limiting, error aggregation, response
//! caching, the key-value store) live in the `shared` crate; this crate
//! wires them into actix middleware and exposes the infrastructure
//! endpoints.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
