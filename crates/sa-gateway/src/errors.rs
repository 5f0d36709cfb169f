//! Gateway error types.
//!
//! Startup-side errors (`ClusterError`, `TransportError`, `DiscoveryError`)
//! are logged and absorbed by the gateway. Per-request errors
//! (`VerifyError`) are folded into a [`Rejection`], which is the only type
//! that reaches HTTP clients via its `IntoResponse` impl.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Cluster identity could not be loaded. Non-fatal: the resolver degrades.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not running in a cluster: {0} is not set")]
    NotInCluster(&'static str),

    #[error("service account token unreadable at {path}: {reason}")]
    TokenUnreadable { path: String, reason: String },
}

/// Outbound connection failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid dial address: {0}")]
    InvalidAddress(String),

    #[error("dial {address} timed out after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    #[error("dial {address} failed: {reason}")]
    Dial { address: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// OIDC provider discovery failures. Fatal to the gateway instance.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Request(String),

    #[error("discovery endpoint returned status {0}")]
    Status(u16),

    #[error("invalid discovery document: {0}")]
    InvalidDocument(String),

    #[error("issuer did not match the issuer returned by provider, expected {expected:?} got {found:?}")]
    IssuerMismatch { expected: String, found: String },
}

/// Token verification failures.
///
/// Each variant is a distinct failure; the display text is what clients see
/// after the `invalid token: ` prefix, so none of them echo token contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    #[error("malformed token")]
    Malformed,

    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,

    #[error("no signing key found for key id")]
    UnknownKey,

    #[error("signing key algorithm does not match token")]
    KeyAlgorithmMismatch,

    #[error("signing key is not usable")]
    InvalidKey,

    #[error("failed to verify signature")]
    InvalidSignature,

    #[error("token is missing the exp claim")]
    MissingExpiry,

    #[error("token is expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token issued-at time is in the future")]
    IatInFuture,

    #[error("expected audience not found in token")]
    AudienceMismatch,

    #[error("token issuer does not match provider")]
    IssuerMismatch,

    #[error("failed to fetch signing keys: {0}")]
    KeySetFetch(String),
}

impl VerifyError {
    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::TokenTooLarge => "too_large",
            VerifyError::Malformed => "malformed",
            VerifyError::UnsupportedAlgorithm | VerifyError::KeyAlgorithmMismatch => "algorithm",
            VerifyError::UnknownKey | VerifyError::InvalidKey => "key",
            VerifyError::InvalidSignature => "signature",
            VerifyError::MissingExpiry
            | VerifyError::Expired
            | VerifyError::NotYetValid
            | VerifyError::IatInFuture => "lifetime",
            VerifyError::AudienceMismatch => "audience",
            VerifyError::IssuerMismatch => "issuer",
            VerifyError::KeySetFetch(_) => "key_fetch",
        }
    }
}

impl From<common::jwt::JwtValidationError> for VerifyError {
    fn from(err: common::jwt::JwtValidationError) -> Self {
        use common::jwt::JwtValidationError as E;
        match err {
            E::TokenTooLarge => VerifyError::TokenTooLarge,
            E::MalformedToken | E::MissingAlgorithm => VerifyError::Malformed,
            E::Expired => VerifyError::Expired,
            E::NotYetValid => VerifyError::NotYetValid,
            E::IatTooFarInFuture => VerifyError::IatInFuture,
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    MissingHeader,
    BadScheme,
    InvalidToken,
    ClaimsError,
    SubjectMissing,
    SubjectDenied,
    ServiceUnavailable,
}

impl RejectionReason {
    /// Stable reason code, also used as the metrics outcome label.
    pub fn code(self) -> &'static str {
        match self {
            RejectionReason::MissingHeader => "missing-header",
            RejectionReason::BadScheme => "bad-scheme",
            RejectionReason::InvalidToken => "invalid-token",
            RejectionReason::ClaimsError => "claims-error",
            RejectionReason::SubjectMissing => "subject-missing",
            RejectionReason::SubjectDenied => "subject-denied",
            RejectionReason::ServiceUnavailable => "service-unavailable",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            RejectionReason::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Terminal rejection of a request by the authentication gateway.
///
/// Maps to:
/// - ServiceUnavailable: 503 Service Unavailable
/// - everything else: 401 Unauthorized with a `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    reason: RejectionReason,
    message: String,
}

impl Rejection {
    pub fn missing_header() -> Self {
        Self::new(
            RejectionReason::MissingHeader,
            "missing authorization header",
        )
    }

    pub fn bad_scheme() -> Self {
        Self::new(
            RejectionReason::BadScheme,
            "invalid authorization header format",
        )
    }

    pub fn invalid_token(err: &VerifyError) -> Self {
        Self::new(RejectionReason::InvalidToken, format!("invalid token: {err}"))
    }

    pub fn claims_error() -> Self {
        Self::new(RejectionReason::ClaimsError, "failed to extract token claims")
    }

    pub fn subject_missing() -> Self {
        Self::new(RejectionReason::SubjectMissing, "subject claim missing")
    }

    pub fn subject_denied() -> Self {
        Self::new(
            RejectionReason::SubjectDenied,
            "subject validation failed: subject not in allowed list",
        )
    }

    pub fn service_unavailable() -> Self {
        Self::new(
            RejectionReason::ServiceUnavailable,
            "JWT authentication not available",
        )
    }

    fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> RejectionReason {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status code for this rejection (for metrics recording).
    pub fn status_code(&self) -> u16 {
        self.reason.status().as_u16()
    }
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.reason.status();
        let mut response = (
            status,
            Json(ErrorResponse {
                error: &self.message,
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            // RFC 6750: no error code when the request carried no credentials
            let challenge = match self.reason {
                RejectionReason::MissingHeader => "Bearer realm=\"sa-gateway\"",
                _ => "Bearer realm=\"sa-gateway\", error=\"invalid_token\"",
            };
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }

        response
    }
}
