//! Service-account gateway library.
//!
//! Authenticates HTTP requests carrying Kubernetes service-account tokens:
//!
//! - Cluster identity discovery (API host, CA bundle, pod token)
//! - Optional DNS bypass of the canonical API hostname
//! - OIDC discovery and JWKS-backed signature verification
//! - Audience, lifetime, issuer and subject allow-list policy
//!
//! # Architecture
//!
//! ```text
//! main.rs -> AuthGateway::initialize
//!            cluster -> transport -> auth::discovery -> auth::verifier
//! routes/mod.rs -> middleware::auth -> gateway -> auth::verifier -> auth::jwks
//! ```
//!
//! # Modules
//!
//! - `auth` - OIDC discovery, key cache, verifier, claims, allow-list
//! - `cluster` - In-cluster identity resolution
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `gateway` - Per-request authentication state machine
//! - `handlers` - HTTP request handlers
//! - `middleware` - Axum adapters for the gateway and HTTP metrics
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup
//! - `transport` - DNS-bypass dialing and HTTP client construction

pub mod auth;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod transport;
