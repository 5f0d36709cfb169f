//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs, their JWK form, and token signing.
//! All fixtures are deterministic based on seed values.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Value};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// Deterministic Ed25519 signing key with a key id.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "test-key-01");
/// let jwks = serde_json::json!({ "keys": [keypair.jwk_json()] });
/// let token = keypair.sign_token(&TestTokenBuilder::new().build());
/// ```
pub struct TestKeypair {
    kid: String,
    seed_bytes: [u8; 32],
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Same seed always produces the same keypair.
    pub fn new(seed: u8, kid: &str) -> Self {
        Self::try_new(seed, kid).expect("Failed to create test keypair")
    }

    pub fn try_new(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes).map_err(|e| {
            FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e))
        })?;

        Ok(Self {
            kid: kid.to_string(),
            seed_bytes,
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// JWK as published in a JWKS document.
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    /// JWK without the optional `alg` member.
    pub fn jwk_json_without_alg(&self) -> Value {
        let mut jwk = self.jwk_json();
        if let Some(obj) = jwk.as_object_mut() {
            obj.remove("alg");
        }
        jwk
    }

    /// Sign `claims` with an `EdDSA` header carrying this key's `kid`.
    pub fn sign_token(&self, claims: &Value) -> String {
        self.try_sign_token(claims).expect("Failed to sign token")
    }

    pub fn try_sign_token(&self, claims: &Value) -> Result<String, FixtureError> {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        encode(&header, claims, &encoding_key).map_err(|e| FixtureError::Encoding(e.to_string()))
    }

    /// Sign with an arbitrary JOSE header.
    ///
    /// The signature is always Ed25519 over `header.payload`, whatever the
    /// header claims, which lets tests build tokens with a wrong `alg`, no
    /// `kid` and so on.
    pub fn sign_with_header(&self, header: &Value, claims: &Value) -> String {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&self.seed_bytes)
            .expect("Failed to create test keypair");

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signature = key_pair.sign(signing_input.as_bytes());

        format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.as_ref())
        )
    }
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code must use ring::rand::SystemRandom.
pub fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // PKCS#8 v1 format for Ed25519 (RFC 5208):
    // SEQUENCE {
    //   version         INTEGER (0),
    //   algorithm       AlgorithmIdentifier,
    //   privateKey      OCTET STRING
    // }
    let mut pkcs8 = Vec::new();

    // Outer SEQUENCE tag
    pkcs8.push(0x30);
    pkcs8.push(0x2e); // Length: 46 bytes

    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);

    // Algorithm Identifier: SEQUENCE with OID 1.3.101.112
    pkcs8.push(0x30);
    pkcs8.push(0x05);
    pkcs8.extend_from_slice(&[0x06, 0x03, 0x2b, 0x65, 0x70]);

    // Private Key: OCTET STRING wrapping OCTET STRING with the seed
    pkcs8.push(0x04);
    pkcs8.push(0x22);
    pkcs8.push(0x04);
    pkcs8.push(0x20);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
