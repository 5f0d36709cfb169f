//! DNS-bypass transport for reaching the API server.
//!
//! Some clusters cannot resolve `kubernetes.default.svc` from inside the pod
//! network. When `KUBERNETES_SERVICE_IP` is set, connections to the canonical
//! API hostname are redirected to that address. The redirect happens at
//! name-resolution time only: the URL, `Host` header and TLS server name all
//! keep the canonical hostname, so certificate verification is unchanged.

use crate::cluster::ClusterEndpoint;
use crate::errors::TransportError;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::ExposeSecret;
use socket2::{SockRef, TcpKeepalive};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tracing::instrument;

/// The in-cluster API server hostname that the bypass rewrites.
pub const CANONICAL_API_HOST: &str = "kubernetes.default.svc";

/// Connection establishment timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// TCP keep-alive interval for pooled connections.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Overall timeout for a single outbound HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether and where to redirect the canonical API hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassPolicy {
    target: Option<String>,
}

/// Where to connect and which name to present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub connect_address: String,
    pub server_name: String,
}

impl BypassPolicy {
    /// A policy redirecting to `target`; empty or absent disables it.
    pub fn new(target: Option<String>) -> Self {
        Self {
            target: target.filter(|t| !t.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Read `KUBERNETES_SERVICE_IP` from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        Self::new(vars.get("KUBERNETES_SERVICE_IP").cloned())
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// The host to connect to in place of `host`, if the bypass applies.
    pub fn substitute_host(&self, host: &str) -> Option<&str> {
        let target = self.target.as_deref()?;
        host.eq_ignore_ascii_case(CANONICAL_API_HOST)
            .then_some(target)
    }

    /// Compute the dial target for a `host:port` address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if `address` has no port.
    pub fn dial_target(&self, address: &str) -> Result<DialTarget, TransportError> {
        let (host, port) = split_host_port(address)?;

        let connect_address = match self.substitute_host(host) {
            Some(target) => join_host_port(target, port),
            None => address.to_string(),
        };

        Ok(DialTarget {
            connect_address,
            server_name: host.to_string(),
        })
    }
}

fn split_host_port(address: &str) -> Result<(&str, &str), TransportError> {
    let invalid = || TransportError::InvalidAddress(address.to_string());

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = tail.strip_prefix(':').ok_or_else(invalid)?;
        if port.is_empty() {
            return Err(invalid());
        }
        return Ok((host, port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() && !host.contains(':') => {
            Ok((host, port))
        }
        _ => Err(invalid()),
    }
}

fn strip_brackets(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

fn join_host_port(host: &str, port: &str) -> String {
    let host = strip_brackets(host);
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Resolve `host`, looking up the bypass target instead when `host` is the
/// canonical API host. Both the HTTP client resolver and [`BypassTransport::dial`]
/// go through here.
async fn resolve_host(
    policy: &BypassPolicy,
    host: &str,
    port: u16,
) -> std::io::Result<Vec<SocketAddr>> {
    let lookup = match policy.substitute_host(host) {
        Some(target) => {
            tracing::debug!(
                target: "sa.transport",
                host = host,
                bypass_target = target,
                "Bypassing DNS for API server host"
            );
            strip_brackets(target)
        }
        None => strip_brackets(host),
    };

    Ok(tokio::net::lookup_host((lookup, port)).await?.collect())
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// `reqwest` resolver applying the bypass at name-resolution time.
#[derive(Debug, Clone)]
pub struct BypassResolver {
    policy: BypassPolicy,
}

impl BypassResolver {
    pub fn new(policy: BypassPolicy) -> Self {
        Self { policy }
    }
}

impl Resolve for BypassResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let policy = self.policy.clone();
        let host = name.as_str().to_string();

        Box::pin(async move {
            // Port is overwritten by the connector with the one from the URL
            match resolve_host(&policy, &host, 0).await {
                Ok(addrs) => Ok(Box::new(addrs.into_iter()) as Addrs),
                Err(e) => Err(Box::new(e) as BoxError),
            }
        })
    }
}

/// Outbound transport built once from a [`BypassPolicy`].
#[derive(Debug, Clone, Default)]
pub struct BypassTransport {
    policy: BypassPolicy,
}

impl BypassTransport {
    pub fn new(policy: BypassPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BypassPolicy {
        &self.policy
    }

    /// Open a TCP connection to `address`, applying the bypass.
    ///
    /// Failures are returned as-is; nothing is retried.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if `address` is not `host:port`
    /// - `DialTimeout` if no connection is established within [`DIAL_TIMEOUT`]
    /// - `Dial` for resolution or connect failures
    #[instrument(skip(self), fields(bypass = self.policy.is_enabled()))]
    pub async fn dial(&self, address: &str) -> Result<TcpStream, TransportError> {
        let connect_address = self.policy.dial_target(address)?.connect_address;
        let (host, port) = split_host_port(address)?;
        let port: u16 = port
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;

        let connecting = connect(&self.policy, host, port, &connect_address);
        match tokio::time::timeout(DIAL_TIMEOUT, connecting).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    target: "sa.transport",
                    address = %connect_address,
                    "Dial timed out"
                );
                Err(TransportError::DialTimeout {
                    address: connect_address,
                    timeout: DIAL_TIMEOUT,
                })
            }
        }
    }

    /// Build the HTTP client used for discovery and key fetching.
    ///
    /// If the cluster trust material is unusable the client is built without
    /// it, keeping the resolver and timeouts.
    pub fn http_client(&self, endpoint: &ClusterEndpoint) -> reqwest::Client {
        match self.client_with_trust(endpoint) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(
                    target: "sa.transport",
                    error = %e,
                    "Failed to build HTTP client with cluster trust material, continuing without it"
                );
                self.client_builder().build().unwrap_or_else(|e| {
                    tracing::warn!(target: "sa.transport", error = %e, "Failed to build HTTP client with custom config, using defaults");
                    reqwest::Client::new()
                })
            }
        }
    }

    fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .tcp_keepalive(KEEP_ALIVE_INTERVAL)
            .timeout(REQUEST_TIMEOUT)
            .dns_resolver(Arc::new(BypassResolver::new(self.policy.clone())))
    }

    fn client_with_trust(
        &self,
        endpoint: &ClusterEndpoint,
    ) -> Result<reqwest::Client, TransportError> {
        let mut builder = self.client_builder();

        if let Some(pem) = &endpoint.trust.ca_bundle_pem {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| TransportError::ClientBuild(format!("invalid CA bundle: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(token) = &endpoint.trust.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| {
                    TransportError::ClientBuild("service account token is not a valid header value".to_string())
                })?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        builder
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))
    }
}

async fn connect(
    policy: &BypassPolicy,
    host: &str,
    port: u16,
    connect_address: &str,
) -> Result<TcpStream, TransportError> {
    let dial_error = |reason: String| TransportError::Dial {
        address: connect_address.to_string(),
        reason,
    };

    let addrs = resolve_host(policy, host, port)
        .await
        .map_err(|e| dial_error(e.to_string()))?;

    let keepalive = TcpKeepalive::new().with_time(KEEP_ALIVE_INTERVAL);
    let mut last_error = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| dial_error(e.to_string()))?;
        SockRef::from(&socket)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| dial_error(e.to_string()))?;

        match socket.connect(addr).await {
            Ok(stream) => {
                tracing::debug!(target: "sa.transport", %addr, "Connected");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(dial_error(
        last_error.unwrap_or_else(|| "address resolved to no endpoints".to_string()),
    ))
}
