//! Builder patterns for test token claims
//!
//! Defaults describe a projected service-account token that is valid for an
//! hour from now.

use crate::crypto_fixtures::TestKeypair;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Default audience used by fixtures and the server harness.
pub const TEST_AUDIENCE: &str = "test-audience";

/// Builder for service-account token claims
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_service_account("payments", "api")
///     .issuer(&issuer.issuer_url())
///     .expires_in(60)
///     .sign(&keypair);
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        let mut builder = Self { claims: Map::new() };
        builder
            .claims
            .insert("aud".to_string(), json!([TEST_AUDIENCE]));
        builder.claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        builder
            .claims
            .insert("iat".to_string(), json!(now.timestamp()));
        builder
            .claims
            .insert("nbf".to_string(), json!(now.timestamp()));
        builder.for_service_account("default", "test-client")
    }

    /// Set `sub` and the `kubernetes.io` claim for a service account.
    pub fn for_service_account(mut self, namespace: &str, name: &str) -> Self {
        self.claims.insert(
            "sub".to_string(),
            json!(format!("system:serviceaccount:{namespace}:{name}")),
        );
        self.claims.insert(
            "kubernetes.io".to_string(),
            json!({
                "namespace": namespace,
                "serviceaccount": {"name": name, "uid": "00000000-0000-0000-0000-000000000001"}
            }),
        );
        self
    }

    pub fn subject(self, sub: &str) -> Self {
        self.claim("sub", json!(sub))
    }

    pub fn issuer(self, iss: &str) -> Self {
        self.claim("iss", json!(iss))
    }

    /// Single-string `aud`.
    pub fn audience(self, aud: &str) -> Self {
        self.claim("aud", json!(aud))
    }

    pub fn audiences(self, auds: &[&str]) -> Self {
        self.claim("aud", json!(auds))
    }

    /// Set expiration in seconds from now (negative for expired tokens)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set not-before in seconds from now
    pub fn not_before_in(self, seconds: i64) -> Self {
        self.claim("nbf", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set issued-at in seconds from now
    pub fn issued_in(self, seconds: i64) -> Self {
        self.claim("iat", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set or replace any claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    /// Build and sign with `keypair`
    pub fn sign(self, keypair: &TestKeypair) -> String {
        keypair.sign_token(&self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let claims = TestTokenBuilder::new().build();

        assert_eq!(claims["sub"], "system:serviceaccount:default:test-client");
        assert_eq!(claims["aud"], json!([TEST_AUDIENCE]));
        assert_eq!(claims["kubernetes.io"]["namespace"], "default");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
        assert!(claims.get("iss").is_none());
    }

    #[test]
    fn test_overrides() {
        let claims = TestTokenBuilder::new()
            .for_service_account("payments", "api")
            .audience("other")
            .issuer("https://issuer.example")
            .expires_in(-10)
            .without("nbf")
            .build();

        assert_eq!(claims["sub"], "system:serviceaccount:payments:api");
        assert_eq!(claims["aud"], "other");
        assert_eq!(claims["iss"], "https://issuer.example");
        assert!(claims["exp"].as_i64().unwrap() < Utc::now().timestamp());
        assert!(claims.get("nbf").is_none());
    }
}
