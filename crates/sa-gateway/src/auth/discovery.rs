//! OIDC provider discovery.
//!
//! Fetches the issuer's `/.well-known/openid-configuration` document once at
//! startup. The document supplies the JWKS location, the canonical issuer
//! string and the signing algorithms the issuer uses.

use crate::auth::jwks::JwksCache;
use crate::auth::verifier::{OidcVerifier, VerifierSettings};
use crate::errors::DiscoveryError;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::str::FromStr;
use tracing::instrument;

/// Path of the discovery document relative to the issuer URL.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Asymmetric JWS algorithms accepted for token signatures.
pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// The subset of the discovery document the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,

    pub jwks_uri: String,

    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// A discovered OIDC provider.
#[derive(Debug, Clone)]
pub struct OidcProvider {
    http_client: reqwest::Client,
    metadata: ProviderMetadata,
}

impl OidcProvider {
    /// Discover the provider at `issuer_url`.
    ///
    /// When `bypass_active` is set, a document whose `issuer` differs from
    /// `issuer_url` is accepted with a warning instead of rejected.
    ///
    /// # Errors
    ///
    /// - `Request` on transport failure
    /// - `Status` on a non-2xx response
    /// - `InvalidDocument` if the body is not a discovery document
    /// - `IssuerMismatch` if the document names another issuer and bypass is off
    #[instrument(skip(http_client), fields(issuer = %issuer_url))]
    pub async fn discover(
        http_client: reqwest::Client,
        issuer_url: &str,
        bypass_active: bool,
    ) -> Result<Self, DiscoveryError> {
        let url = discovery_url(issuer_url);
        tracing::debug!(target: "sa.auth.discovery", url = %url, "Fetching OIDC discovery document");

        let response = http_client.get(&url).send().await.map_err(|e| {
            tracing::error!(target: "sa.auth.discovery", error = %e, "Failed to fetch discovery document");
            DiscoveryError::Request(e.to_string())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "sa.auth.discovery",
                status = %response.status(),
                "Discovery endpoint returned error"
            );
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let metadata: ProviderMetadata = response.json().await.map_err(|e| {
            tracing::error!(target: "sa.auth.discovery", error = %e, "Failed to parse discovery document");
            DiscoveryError::InvalidDocument(e.to_string())
        })?;

        if metadata.issuer != issuer_url {
            if !bypass_active {
                return Err(DiscoveryError::IssuerMismatch {
                    expected: issuer_url.to_string(),
                    found: metadata.issuer,
                });
            }
            tracing::warn!(
                target: "sa.auth.discovery",
                expected = %issuer_url,
                found = %metadata.issuer,
                "Discovered issuer differs from requested issuer, accepting because DNS bypass is active"
            );
        }

        tracing::info!(
            target: "sa.auth.discovery",
            issuer = %metadata.issuer,
            jwks_uri = %metadata.jwks_uri,
            "OIDC provider discovered"
        );

        Ok(Self {
            http_client,
            metadata,
        })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Signing algorithms tokens from this issuer may use.
    ///
    /// The advertised list filtered to [`SUPPORTED_ALGORITHMS`], or `RS256`
    /// when the issuer advertises nothing.
    pub fn accepted_algorithms(&self) -> Vec<Algorithm> {
        accepted_algorithms(&self.metadata.id_token_signing_alg_values_supported)
    }

    /// Build a verifier bound to this provider's issuer and keys.
    pub fn verifier(&self, settings: VerifierSettings) -> OidcVerifier {
        let jwks = JwksCache::new(
            self.http_client.clone(),
            self.metadata.jwks_uri.clone(),
            settings.cache_ttl,
        );
        OidcVerifier::from_parts(
            self.metadata.issuer.clone(),
            self.accepted_algorithms(),
            jwks,
            settings,
        )
    }
}

fn discovery_url(issuer_url: &str) -> String {
    format!("{}{}", issuer_url.trim_end_matches('/'), DISCOVERY_PATH)
}

fn accepted_algorithms(advertised: &[String]) -> Vec<Algorithm> {
    if advertised.is_empty() {
        return vec![Algorithm::RS256];
    }

    advertised
        .iter()
        .filter_map(|name| Algorithm::from_str(name).ok())
        .filter(|alg| SUPPORTED_ALGORITHMS.contains(alg))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn discovery_doc(issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "jwks_uri": format!("{issuer}/openid/v1/jwks"),
            "response_types_supported": ["id_token"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })
    }

    async fn mount_doc(server: &MockServer, doc: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc))
            .mount(server)
            .await;
    }

    #[test]
    fn test_discovery_url_trims_trailing_slash() {
        assert_eq!(
            discovery_url("https://kubernetes.default.svc/"),
            "https://kubernetes.default.svc/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://kubernetes.default.svc"),
            "https://kubernetes.default.svc/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_accepted_algorithms_defaults_to_rs256() {
        assert_eq!(accepted_algorithms(&[]), vec![Algorithm::RS256]);
    }

    #[test]
    fn test_accepted_algorithms_drops_symmetric_and_unknown() {
        let advertised = ["RS256", "HS256", "none", "ES256", "bogus"]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            accepted_algorithms(&advertised),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
    }

    #[tokio::test]
    async fn test_discover_success() {
        let server = MockServer::start().await;
        let issuer = server.uri();
        mount_doc(&server, discovery_doc(&issuer)).await;

        let provider = OidcProvider::discover(reqwest::Client::new(), &issuer, false)
            .await
            .unwrap();

        assert_eq!(provider.metadata().issuer, issuer);
        assert_eq!(
            provider.metadata().jwks_uri,
            format!("{issuer}/openid/v1/jwks")
        );
        assert_eq!(provider.accepted_algorithms(), vec![Algorithm::RS256]);
    }

    #[tokio::test]
    async fn test_discover_issuer_mismatch_is_fatal_without_bypass() {
        let server = MockServer::start().await;
        mount_doc(&server, discovery_doc("https://elsewhere.example")).await;

        let result = OidcProvider::discover(reqwest::Client::new(), &server.uri(), false).await;

        assert!(matches!(
            result,
            Err(DiscoveryError::IssuerMismatch { found, .. }) if found == "https://elsewhere.example"
        ));
    }

    #[tokio::test]
    async fn test_discover_issuer_mismatch_tolerated_with_bypass() {
        let server = MockServer::start().await;
        mount_doc(&server, discovery_doc("https://elsewhere.example")).await;

        let provider = OidcProvider::discover(reqwest::Client::new(), &server.uri(), true)
            .await
            .unwrap();

        assert_eq!(provider.metadata().issuer, "https://elsewhere.example");
    }

    #[tokio::test]
    async fn test_discover_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = OidcProvider::discover(reqwest::Client::new(), &server.uri(), false).await;

        assert!(matches!(result, Err(DiscoveryError::Status(404))));
    }

    #[tokio::test]
    async fn test_discover_invalid_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = OidcProvider::discover(reqwest::Client::new(), &server.uri(), false).await;

        assert!(matches!(result, Err(DiscoveryError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn test_discover_unreachable_issuer() {
        // Nothing listens on port 1
        let result =
            OidcProvider::discover(reqwest::Client::new(), "http://127.0.0.1:1", false).await;

        assert!(matches!(result, Err(DiscoveryError::Request(_))));
    }
}
