//! Shared building blocks for the service-account gateway.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (header parsing, time-bound checks, constants)
pub mod jwt;
