//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real gateway instances in tests.

use crate::token_builders::TEST_AUDIENCE;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sa_gateway::config::Config;
use sa_gateway::gateway::AuthGateway;
use sa_gateway::observability::metrics::init_metrics_recorder;
use sa_gateway::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide metrics handle; installs the global recorder on first use.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            // Another test may already have installed a recorder
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Minimal environment for a gateway trusting `issuer_url`.
pub fn gateway_vars(issuer_url: &str) -> HashMap<String, String> {
    HashMap::from([
        (
            "JWT_EXPECTED_AUDIENCE".to_string(),
            TEST_AUDIENCE.to_string(),
        ),
        ("OIDC_ISSUER_URL".to_string(), issuer_url.to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ])
}

/// Build the real router for `vars`, running gateway initialization.
pub async fn test_router(vars: &HashMap<String, String>) -> Result<Router, anyhow::Error> {
    let config =
        Config::from_vars(vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;
    let gateway = Arc::new(AuthGateway::initialize(&config).await);
    let state = Arc::new(AppState { gateway, config });
    Ok(routes::build_routes(state, test_metrics_handle()))
}

/// Test harness for spawning the gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let issuer = MockOidcIssuer::start(&[&keypair]).await;
///     let server = TestGatewayServer::spawn(&gateway_vars(&issuer.issuer_url())).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a server on a random local port.
    pub async fn spawn(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let app = test_router(vars).await?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockOidcIssuer, TestKeypair, TestTokenBuilder};

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let keypair = TestKeypair::new(1, "k1");
        let issuer = MockOidcIssuer::start(&[&keypair]).await;
        let server = TestGatewayServer::spawn(&gateway_vars(&issuer.issuer_url())).await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().port() > 0);

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_authenticates_over_the_wire() -> Result<(), anyhow::Error> {
        let keypair = TestKeypair::new(2, "k2");
        let issuer = MockOidcIssuer::start(&[&keypair]).await;
        let server = TestGatewayServer::spawn(&gateway_vars(&issuer.issuer_url())).await?;
        let token = TestTokenBuilder::new()
            .issuer(&issuer.issuer_url())
            .sign(&keypair);

        let response = reqwest::Client::new()
            .get(format!("{}/api/v1/me", server.url()))
            .bearer_auth(token)
            .send()
            .await?;

        assert_eq!(response.status(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let issuer = MockOidcIssuer::start(&[]).await;
        let vars = gateway_vars(&issuer.issuer_url());

        let server1 = TestGatewayServer::spawn(&vars).await?;
        let server2 = TestGatewayServer::spawn(&vars).await?;

        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
