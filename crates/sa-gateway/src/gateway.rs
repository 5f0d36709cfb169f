//! Per-request authentication gateway.
//!
//! Every request walks the same chain of checks:
//!
//! ```text
//! Start -> HeaderPresent -> SchemeValid -> TokenVerified
//!       -> ClaimsExtracted -> SubjectChecked -> Authenticated
//! ```
//!
//! Any failing step ends in a [`Rejection`]. The gateway knows nothing about
//! axum; `middleware::auth` adapts it.

use crate::auth::{Claims, OidcProvider, TokenVerifier, VerifierSettings};
use crate::config::{Config, GatewayConfig};
use crate::errors::Rejection;
use crate::observability::metrics::record_auth_outcome;
use crate::transport::BypassTransport;
use axum::http::{header, HeaderMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of authenticating one request.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(Claims),
    Rejected(Rejection),
}

impl AuthOutcome {
    fn label(&self) -> &'static str {
        match self {
            AuthOutcome::Authenticated(_) => "authenticated",
            AuthOutcome::Rejected(rejection) => rejection.reason().code(),
        }
    }
}

impl From<Result<Claims, Rejection>> for AuthOutcome {
    fn from(result: Result<Claims, Rejection>) -> Self {
        match result {
            Ok(claims) => AuthOutcome::Authenticated(claims),
            Err(rejection) => AuthOutcome::Rejected(rejection),
        }
    }
}

/// Authentication gateway shared by all requests.
///
/// Built once at startup. A gateway without a verifier is permanently
/// unavailable and answers every request with 503.
pub struct AuthGateway {
    config: GatewayConfig,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl AuthGateway {
    pub fn new(config: GatewayConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            verifier: Some(verifier),
        }
    }

    /// A gateway whose construction failed.
    pub fn unavailable(config: GatewayConfig) -> Self {
        Self {
            config,
            verifier: None,
        }
    }

    /// Resolve the cluster identity, build the bypass-aware HTTP client and
    /// discover the issuer.
    ///
    /// Never fails: a discovery error is logged and yields an unavailable
    /// gateway. There is no later retry.
    #[instrument(skip_all, name = "sa.gateway.initialize", fields(issuer = %config.oidc_issuer_url))]
    pub async fn initialize(config: &Config) -> Self {
        let endpoint = config.cluster.resolve();
        let bypass_active = config.bypass.is_enabled();
        let http_client = BypassTransport::new(config.bypass.clone()).http_client(&endpoint);

        match OidcProvider::discover(http_client, &config.oidc_issuer_url, bypass_active).await {
            Ok(provider) => {
                let verifier = provider.verifier(VerifierSettings {
                    audience: config.gateway.expected_audience.clone(),
                    skip_issuer_check: bypass_active,
                    clock_skew: config.jwt_clock_skew,
                    cache_ttl: config.jwks_cache_ttl,
                });
                tracing::info!(
                    target: "sa.gateway",
                    bypass_active,
                    allowed_subjects = config.gateway.allowed_subjects.len(),
                    "Authentication gateway ready"
                );
                Self::new(config.gateway.clone(), Arc::new(verifier))
            }
            Err(e) => {
                tracing::error!(
                    target: "sa.gateway",
                    error = %e,
                    "OIDC discovery failed, authentication is unavailable"
                );
                Self::unavailable(config.gateway.clone())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Authenticate a request from its headers.
    #[instrument(skip_all, name = "sa.gateway.authenticate")]
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let start = Instant::now();
        let outcome = AuthOutcome::from(self.evaluate(headers).await);

        if let AuthOutcome::Rejected(rejection) = &outcome {
            tracing::debug!(
                target: "sa.gateway",
                reason = rejection.reason().code(),
                "Request rejected"
            );
        }
        record_auth_outcome(outcome.label(), start.elapsed());

        outcome
    }

    async fn evaluate(&self, headers: &HeaderMap) -> Result<Claims, Rejection> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(Rejection::service_unavailable)?;

        let value = headers
            .get(header::AUTHORIZATION)
            .filter(|v| !v.is_empty())
            .ok_or_else(Rejection::missing_header)?;

        // Values with bytes outside visible ASCII fail to_str
        let token = value
            .to_str()
            .ok()
            .and_then(bearer_token)
            .ok_or_else(Rejection::bad_scheme)?;

        let verified = verifier
            .verify(token)
            .await
            .map_err(|e| Rejection::invalid_token(&e))?;

        let claims = Claims::from_map(verified.claims()).map_err(|e| {
            tracing::debug!(target: "sa.gateway", error = %e, "Failed to decode verified claims");
            Rejection::claims_error()
        })?;

        if !self.config.allowed_subjects.is_empty() {
            let subject = claims.sub.as_deref().ok_or_else(Rejection::subject_missing)?;
            if !self.config.allowed_subjects.permits(subject) {
                return Err(Rejection::subject_denied());
            }
        }

        Ok(claims)
    }
}

/// `Bearer <token>` with exactly two whitespace-separated parts.
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}
