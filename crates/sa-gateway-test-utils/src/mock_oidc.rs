//! Mock OIDC issuer backed by wiremock
//!
//! Serves a discovery document and a JWKS document the way the Kubernetes
//! API server does (`/.well-known/openid-configuration`, `/openid/v1/jwks`).

use crate::crypto_fixtures::TestKeypair;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/openid/v1/jwks";

/// Options for [`MockOidcIssuer::start_with`].
#[derive(Debug, Clone, Default)]
pub struct MockIssuerOptions {
    /// Host used in the issuer URL instead of `127.0.0.1` (the port stays
    /// the mock server's). Lets tests use names only a bypass resolver can
    /// reach.
    pub public_host: Option<String>,

    /// `issuer` value in the discovery document, if not the issuer URL.
    pub advertised_issuer: Option<String>,

    /// `id_token_signing_alg_values_supported`; defaults to `["EdDSA"]`.
    pub algorithms: Option<Vec<String>>,

    /// Fail verification on drop unless the JWKS endpoint was hit exactly
    /// this many times.
    pub expected_jwks_fetches: Option<u64>,
}

/// A running mock issuer.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "test-key-01");
/// let issuer = MockOidcIssuer::start(&[&keypair]).await;
/// let vars = gateway_vars(&issuer.issuer_url());
/// ```
pub struct MockOidcIssuer {
    server: MockServer,
    issuer_url: String,
}

impl MockOidcIssuer {
    /// Start an issuer publishing `keys`.
    pub async fn start(keys: &[&TestKeypair]) -> Self {
        Self::start_with(keys, MockIssuerOptions::default()).await
    }

    pub async fn start_with(keys: &[&TestKeypair], options: MockIssuerOptions) -> Self {
        let jwks = json!({
            "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>()
        });
        Self::start_with_jwks(jwks, options).await
    }

    /// Start an issuer serving a hand-built JWKS document.
    pub async fn start_with_jwks(jwks: Value, options: MockIssuerOptions) -> Self {
        let server = MockServer::start().await;
        let issuer_url = match &options.public_host {
            Some(host) => format!("http://{}:{}", host, server.address().port()),
            None => server.uri(),
        };

        let discovery = json!({
            "issuer": options.advertised_issuer.clone().unwrap_or_else(|| issuer_url.clone()),
            "jwks_uri": format!("{issuer_url}{JWKS_PATH}"),
            "response_types_supported": ["id_token"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported":
                options.algorithms.clone().unwrap_or_else(|| vec!["EdDSA".to_string()])
        });

        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&discovery))
            .mount(&server)
            .await;

        let jwks_mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&jwks));
        match options.expected_jwks_fetches {
            Some(n) => jwks_mock.expect(n).mount(&server).await,
            None => jwks_mock.mount(&server).await,
        }

        Self { server, issuer_url }
    }

    /// A server answering discovery with `status` and nothing else.
    pub async fn failing(status: u16) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        let issuer_url = server.uri();
        Self { server, issuer_url }
    }

    /// Issuer URL to configure the gateway with.
    pub fn issuer_url(&self) -> String {
        self.issuer_url.clone()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Number of JWKS requests received so far.
    pub async fn jwks_fetches(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == JWKS_PATH)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_discovery_and_jwks() {
        let keypair = TestKeypair::new(1, "k1");
        let issuer = MockOidcIssuer::start(&[&keypair]).await;

        let doc: Value = reqwest::get(format!("{}{}", issuer.issuer_url(), DISCOVERY_PATH))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(doc["issuer"], issuer.issuer_url());

        let jwks: Value = reqwest::get(doc["jwks_uri"].as_str().unwrap())
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(jwks["keys"][0]["kid"], "k1");
        assert_eq!(issuer.jwks_fetches().await, 1);
    }

    #[tokio::test]
    async fn test_public_host_rewrites_issuer() {
        let issuer = MockOidcIssuer::start_with(
            &[],
            MockIssuerOptions {
                public_host: Some("kubernetes.default.svc".to_string()),
                ..Default::default()
            },
        )
        .await;

        assert_eq!(
            issuer.issuer_url(),
            format!(
                "http://kubernetes.default.svc:{}",
                issuer.server().address().port()
            )
        );
    }
}
