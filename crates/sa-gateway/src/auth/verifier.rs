//! Token verification against a discovered OIDC provider.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only asymmetric algorithms the issuer advertises are accepted; `none`
//!   and HMAC algorithms never are
//! - Signature and audience are always checked; only the `iss` string
//!   comparison can be disabled (when the DNS bypass is active)
//! - No leeway on `exp`/`nbf`; `iat` may be ahead by at most the clock skew

use crate::auth::claims::numeric_date;
use crate::auth::discovery::OidcProvider;
use crate::auth::jwks::{JwksCache, DEFAULT_CACHE_TTL};
use crate::errors::{DiscoveryError, VerifyError};
use async_trait::async_trait;
use common::jwt::{parse_header, validate_iat_at, validate_lifetime_at, DEFAULT_CLOCK_SKEW};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Abstraction over token verification so the gateway can run with any
/// verifier implementation.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `raw_token` and return its claims.
    async fn verify(&self, raw_token: &str) -> Result<VerifiedToken, VerifyError>;
}

/// Per-verifier policy.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Audience that must appear in `aud`.
    pub audience: String,

    /// Skip the `iss` string comparison.
    pub skip_issuer_check: bool,

    /// Tolerance for `iat` in the future.
    pub clock_skew: Duration,

    /// Signing-key cache TTL.
    pub cache_ttl: Duration,
}

impl VerifierSettings {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            skip_issuer_check: false,
            clock_skew: DEFAULT_CLOCK_SKEW,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Claims of a token whose signature and policy checks passed.
#[derive(Clone)]
pub struct VerifiedToken {
    claims: Map<String, Value>,
}

impl VerifiedToken {
    /// Wrap claims that another [`TokenVerifier`] implementation has checked.
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

impl fmt::Debug for VerifiedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedToken")
            .field("claim_names", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Verifier bound to one issuer and audience.
pub struct OidcVerifier {
    issuer: String,
    algorithms: Vec<Algorithm>,
    jwks: JwksCache,
    settings: VerifierSettings,
}

impl OidcVerifier {
    /// Discover `issuer` and build a verifier for `audience`.
    ///
    /// `bypass_active` relaxes both the discovery issuer comparison and the
    /// per-token `iss` check.
    ///
    /// # Errors
    ///
    /// Any [`DiscoveryError`] from provider discovery.
    pub async fn new(
        http_client: reqwest::Client,
        issuer: &str,
        audience: &str,
        bypass_active: bool,
    ) -> Result<Self, DiscoveryError> {
        let provider = OidcProvider::discover(http_client, issuer, bypass_active).await?;
        Ok(provider.verifier(VerifierSettings {
            skip_issuer_check: bypass_active,
            ..VerifierSettings::new(audience)
        }))
    }

    pub(crate) fn from_parts(
        issuer: String,
        algorithms: Vec<Algorithm>,
        jwks: JwksCache,
        settings: VerifierSettings,
    ) -> Self {
        tracing::debug!(
            target: "sa.auth.verifier",
            issuer = %issuer,
            algorithms = ?algorithms,
            skip_issuer_check = settings.skip_issuer_check,
            "Verifier configured"
        );
        Self {
            issuer,
            algorithms,
            jwks,
            settings,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Verify a compact JWS and return its claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size check and header parse (`kid`, `alg`)
    /// 2. `alg` must be accepted for this issuer
    /// 3. Key lookup, refreshing the key set once on miss; without a `kid`
    ///    every key is tried
    /// 4. JWK `alg` (if declared) must equal the header `alg`; signature check
    /// 5. `nbf <= now < exp`, `iat` within clock skew
    /// 6. `aud` contains the expected audience
    /// 7. `iss` equals the discovered issuer unless the check is disabled
    ///
    /// # Errors
    ///
    /// The first failing check as a distinct [`VerifyError`].
    #[instrument(skip_all)]
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedToken, VerifyError> {
        let header = parse_header(raw_token).map_err(|e| {
            tracing::debug!(target: "sa.auth.verifier", error = %e, "Token header rejected");
            VerifyError::from(e)
        })?;

        let alg = Algorithm::from_str(&header.alg)
            .ok()
            .filter(|alg| self.algorithms.contains(alg))
            .ok_or_else(|| {
                tracing::debug!(target: "sa.auth.verifier", alg = %header.alg, "Token algorithm not accepted");
                VerifyError::UnsupportedAlgorithm
            })?;

        // Time, audience and issuer are checked below with exact semantics
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let claims = match header.kid.as_deref() {
            Some(kid) => {
                let jwk = self.jwks.get_key(kid).await?;
                let decoding_key = decoding_key_for(&jwk, alg).inspect_err(|e| {
                    tracing::warn!(target: "sa.auth.verifier", error = %e, "Signing key unusable for token");
                })?;
                decode::<Map<String, Value>>(raw_token, &decoding_key, &validation)
                    .map_err(|e| {
                        tracing::debug!(target: "sa.auth.verifier", error = %e, "Token signature verification failed");
                        map_decode_error(e.kind())
                    })?
                    .claims
            }
            None => self.decode_with_any_key(raw_token, alg, &validation).await?,
        };

        let now = chrono::Utc::now().timestamp();
        let exp = numeric_claim(&claims, "exp")?.ok_or(VerifyError::MissingExpiry)?;
        let nbf = numeric_claim(&claims, "nbf")?;
        validate_lifetime_at(exp, nbf, now)?;

        if let Some(iat) = numeric_claim(&claims, "iat")? {
            validate_iat_at(iat, self.settings.clock_skew, now)?;
        }

        if !audience_contains(claims.get("aud"), &self.settings.audience) {
            tracing::debug!(target: "sa.auth.verifier", "Token audience rejected");
            return Err(VerifyError::AudienceMismatch);
        }

        if !self.settings.skip_issuer_check
            && claims.get("iss").and_then(Value::as_str) != Some(self.issuer.as_str())
        {
            tracing::debug!(target: "sa.auth.verifier", "Token issuer rejected");
            return Err(VerifyError::IssuerMismatch);
        }

        tracing::debug!(target: "sa.auth.verifier", "Token verified successfully");
        Ok(VerifiedToken { claims })
    }

    /// Try every compatible key for a token without a `kid`, then once more
    /// after a key-set refresh.
    async fn decode_with_any_key(
        &self,
        raw_token: &str,
        alg: Algorithm,
        validation: &Validation,
    ) -> Result<Map<String, Value>, VerifyError> {
        let keys = self.jwks.keys().await?;
        if let Some(claims) = decode_with_first_match(&keys, raw_token, alg, validation) {
            return Ok(claims);
        }

        tracing::debug!(target: "sa.auth.verifier", "No cached key verified token without kid, refreshing");
        let keys = self.jwks.refreshed_keys().await?;
        decode_with_first_match(&keys, raw_token, alg, validation).ok_or_else(|| {
            tracing::debug!(target: "sa.auth.verifier", key_count = keys.len(), "No key verified token without kid");
            if keys.is_empty() {
                VerifyError::UnknownKey
            } else {
                VerifyError::InvalidSignature
            }
        })
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, raw_token: &str) -> Result<VerifiedToken, VerifyError> {
        OidcVerifier::verify(self, raw_token).await
    }
}

fn signing_algorithm(key_alg: &KeyAlgorithm) -> Option<Algorithm> {
    match key_alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        // Encryption algorithms
        _ => None,
    }
}

/// Decoding key for `jwk`, provided its declared `alg` (if any) is `alg`.
fn decoding_key_for(jwk: &Jwk, alg: Algorithm) -> Result<DecodingKey, VerifyError> {
    if let Some(key_alg) = jwk.common.key_algorithm.as_ref() {
        if signing_algorithm(key_alg) != Some(alg) {
            return Err(VerifyError::KeyAlgorithmMismatch);
        }
    }
    DecodingKey::from_jwk(jwk).map_err(|_| VerifyError::InvalidKey)
}

fn decode_with_first_match(
    keys: &[Jwk],
    raw_token: &str,
    alg: Algorithm,
    validation: &Validation,
) -> Option<Map<String, Value>> {
    keys.iter()
        .filter_map(|jwk| decoding_key_for(jwk, alg).ok())
        .find_map(|key| decode::<Map<String, Value>>(raw_token, &key, validation).ok())
        .map(|data| data.claims)
}

fn map_decode_error(kind: &ErrorKind) -> VerifyError {
    match kind {
        ErrorKind::InvalidSignature => VerifyError::InvalidSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            VerifyError::KeyAlgorithmMismatch
        }
        ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) => {
            VerifyError::InvalidKey
        }
        _ => VerifyError::Malformed,
    }
}

/// Read a NumericDate claim. Absent is `None`; a non-number is malformed.
fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Result<Option<i64>, VerifyError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => numeric_date(value).map(Some).ok_or(VerifyError::Malformed),
    }
}

fn audience_contains(aud: Option<&Value>, expected: &str) -> bool {
    match aud {
        Some(Value::String(aud)) => aud == expected,
        Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(expected)),
        _ => false,
    }
}
