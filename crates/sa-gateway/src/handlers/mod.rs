//! HTTP request handlers for the gateway service.

pub mod health;
pub mod me;
pub mod metrics;

pub use health::{health_check, readiness_check};
pub use me::{get_me, MeResponse};
pub use metrics::metrics_handler;
