//! Middleware components for HTTP request processing.
//!
//! Cross-cutting concerns layered onto the axum router: admin authentication,
//! client identification, rate limiting, security headers and request
//! validation.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
