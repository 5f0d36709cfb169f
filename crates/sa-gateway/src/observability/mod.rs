//! Observability for the gateway.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
