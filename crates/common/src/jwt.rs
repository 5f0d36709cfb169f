//! JWT primitives shared by the gateway and its test tooling.
//!
//! This module provides the pieces of token handling that do not depend on a
//! particular key source:
//! - Size limit applied before any parsing
//! - Clock skew constants for `iat` validation
//! - Unverified header parsing (`kid`, `alg`) for key selection
//! - Lifetime (`exp`/`nbf`) and `iat` validation against an explicit clock
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Header values are only ever used to select a key from a trusted key set;
//!   the token MUST still be signature-verified afterwards
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_header, validate_lifetime_at, validate_iat_at, DEFAULT_CLOCK_SKEW};
//!
//! let header = parse_header(token)?;
//! let candidates = match &header.kid {
//!     Some(kid) => vec![jwks.get_key(kid).await?],
//!     None => jwks.keys().await?,
//! };
//! // ... verify signature ...
//! validate_lifetime_at(claims.exp, claims.nbf, now)?;
//! validate_iat_at(iat, DEFAULT_CLOCK_SKEW, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Projected service-account tokens are typically 800-1200 bytes. Anything
/// larger than this is rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with an `iat` more than this far in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the key-independent token checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token is not a three-part compact JWS or its header cannot be decoded.
    #[error("malformed token")]
    MalformedToken,

    /// Token header has no usable `alg`.
    #[error("token header is missing an algorithm")]
    MissingAlgorithm,

    /// `exp` is at or before the current time.
    #[error("token is expired")]
    Expired,

    /// `nbf` is after the current time.
    #[error("token is not valid yet")]
    NotYetValid,

    /// Token `iat` claim is too far in the future.
    #[error("token issued-at time is in the future")]
    IatTooFarInFuture,
}

// =============================================================================
// Header
// =============================================================================

/// The parts of a JOSE header needed to select a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Key identifier used to look the key up in the issuer's key set.
    /// `None` when the header carries no usable `kid`.
    pub kid: Option<String>,

    /// Signing algorithm as written in the header (e.g. `RS256`).
    pub alg: String,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    kid: Option<serde_json::Value>,
    #[serde(default)]
    alg: Option<serde_json::Value>,
}

/// Parse the JOSE header of a compact JWT without verifying the signature.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not three dot-separated parts, bad base64, or bad JSON
/// - `MissingAlgorithm` - `alg` absent, not a string, or empty
pub fn parse_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let kid = non_empty_string(raw.kid);
    let alg = non_empty_string(raw.alg).ok_or(JwtValidationError::MissingAlgorithm)?;

    Ok(TokenHeader { kid, alg })
}

fn non_empty_string(value: Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

// =============================================================================
// Time-bound claims
// =============================================================================

/// Validate `exp` and `nbf` against an explicit `now` (Unix seconds).
///
/// A token is live when `now >= nbf` (if present) and `now < exp`. No leeway
/// is applied to either bound.
///
/// # Errors
///
/// `NotYetValid` if `now < nbf`, `Expired` if `now >= exp`.
pub fn validate_lifetime_at(
    exp: i64,
    nbf: Option<i64>,
    now: i64,
) -> Result<(), JwtValidationError> {
    if let Some(nbf) = nbf {
        if now < nbf {
            tracing::debug!(target: "common.jwt", nbf = nbf, now = now, "Token rejected: not valid yet");
            return Err(JwtValidationError::NotYetValid);
        }
    }

    if now >= exp {
        tracing::debug!(target: "common.jwt", exp = exp, now = now, "Token rejected: expired");
        return Err(JwtValidationError::Expired);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim against an explicit `now` timestamp.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds) by config
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
