//! HTTP middleware for the gateway service.
//!
//! # Components
//!
//! - `auth` - Authentication middleware for protected routes
//! - `http_metrics` - HTTP request metrics for all responses

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthState, ClaimsExt};
pub use http_metrics::http_metrics_middleware;
