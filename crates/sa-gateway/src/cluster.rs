//! Cluster identity resolution.
//!
//! Loads the in-cluster API endpoint and the pod's mounted service-account
//! credentials. When the process is not running in a pod (or the mount is
//! unreadable) the resolver degrades to the canonical API hostname with no
//! trust material; it never fails.

use crate::errors::ClusterError;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Where kubelet mounts the projected service-account volume.
pub const DEFAULT_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// API server address used when in-cluster configuration is unavailable.
pub const DEFAULT_API_HOST: &str = "https://kubernetes.default.svc";

const TOKEN_FILE: &str = "token";
const CA_FILE: &str = "ca.crt";

/// Trust material for talking to the API server.
#[derive(Clone, Default)]
pub struct TrustConfig {
    /// PEM bundle of the cluster CA.
    pub ca_bundle_pem: Option<Vec<u8>>,

    /// The pod's service-account token.
    pub bearer_token: Option<SecretString>,
}

impl fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfig")
            .field(
                "ca_bundle_pem",
                &self.ca_bundle_pem.as_ref().map(|pem| format!("{} bytes", pem.len())),
            )
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Resolved API server endpoint.
#[derive(Debug, Clone)]
pub struct ClusterEndpoint {
    pub host: String,
    pub trust: TrustConfig,
}

impl ClusterEndpoint {
    /// The endpoint used when no cluster identity is available.
    pub fn degraded() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            trust: TrustConfig::default(),
        }
    }
}

/// Reads the in-cluster environment and service-account mount.
#[derive(Debug, Clone)]
pub struct ClusterIdentityResolver {
    service_host: Option<String>,
    service_port: Option<String>,
    sa_dir: PathBuf,
}

impl ClusterIdentityResolver {
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Build a resolver from an explicit variable map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        Self {
            service_host: non_empty(vars.get("KUBERNETES_SERVICE_HOST")),
            service_port: non_empty(vars.get("KUBERNETES_SERVICE_PORT")),
            sa_dir: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_DIR),
        }
    }

    /// Override the service-account mount directory.
    pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sa_dir = dir.into();
        self
    }

    pub fn service_account_dir(&self) -> &Path {
        &self.sa_dir
    }

    /// Resolve the cluster endpoint, degrading instead of failing.
    #[instrument(skip_all)]
    pub fn resolve(&self) -> ClusterEndpoint {
        match self.try_load() {
            Ok(endpoint) => {
                tracing::info!(
                    target: "sa.cluster",
                    host = %endpoint.host,
                    has_ca = endpoint.trust.ca_bundle_pem.is_some(),
                    "Loaded in-cluster configuration"
                );
                endpoint
            }
            Err(e) => {
                tracing::error!(
                    target: "sa.cluster",
                    error = %e,
                    fallback = DEFAULT_API_HOST,
                    "Failed to load in-cluster configuration, continuing without cluster credentials"
                );
                ClusterEndpoint::degraded()
            }
        }
    }

    /// Load the in-cluster configuration.
    ///
    /// # Errors
    ///
    /// - `NotInCluster` if either service variable is missing
    /// - `TokenUnreadable` if the mounted token cannot be read
    pub fn try_load(&self) -> Result<ClusterEndpoint, ClusterError> {
        let service_host = self
            .service_host
            .as_deref()
            .ok_or(ClusterError::NotInCluster("KUBERNETES_SERVICE_HOST"))?;
        let service_port = self
            .service_port
            .as_deref()
            .ok_or(ClusterError::NotInCluster("KUBERNETES_SERVICE_PORT"))?;

        let token_path = self.sa_dir.join(TOKEN_FILE);
        let token = std::fs::read_to_string(&token_path).map_err(|e| {
            ClusterError::TokenUnreadable {
                path: token_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let ca_path = self.sa_dir.join(CA_FILE);
        let ca_bundle_pem = match std::fs::read(&ca_path) {
            Ok(pem) => Some(pem),
            Err(e) => {
                tracing::error!(
                    target: "sa.cluster",
                    path = %ca_path.display(),
                    error = %e,
                    "Failed to read cluster CA bundle"
                );
                None
            }
        };

        Ok(ClusterEndpoint {
            host: format!("https://{}:{}", bracket_ipv6(service_host), service_port),
            trust: TrustConfig {
                ca_bundle_pem,
                bearer_token: Some(SecretString::from(token.trim_end().to_string())),
            },
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
