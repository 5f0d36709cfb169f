//! # SA Gateway Test Utilities
//!
//! Shared test utilities for the service-account gateway.
//!
//! This crate provides:
//! - Deterministic Ed25519 keypairs and token signing (`TestKeypair`)
//! - Token claim builders (`TestTokenBuilder`)
//! - A wiremock-backed OIDC issuer (`MockOidcIssuer`)
//! - Server test harness (`TestGatewayServer`, `test_router`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sa_gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let keypair = TestKeypair::new(1, "test-key-01");
//!     let issuer = MockOidcIssuer::start(&[&keypair]).await;
//!     let server = TestGatewayServer::spawn(&gateway_vars(&issuer.issuer_url())).await?;
//!
//!     let token = TestTokenBuilder::new().issuer(&issuer.issuer_url()).sign(&keypair);
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/v1/me", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_oidc;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_oidc::*;
pub use server_harness::*;
pub use token_builders::*;
