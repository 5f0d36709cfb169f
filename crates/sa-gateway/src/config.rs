//! Gateway configuration.
//!
//! Configuration is loaded from environment variables once at startup and
//! never changes afterwards.

use crate::auth::jwks::DEFAULT_CACHE_TTL;
use crate::auth::SubjectAllowList;
use crate::cluster::{ClusterIdentityResolver, DEFAULT_API_HOST};
use crate::transport::BypassPolicy;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Authentication policy applied to every request.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Audience that must appear in the token's `aud` claim.
    pub expected_audience: String,

    /// Subjects allowed through; empty allows any verified subject.
    pub allowed_subjects: SubjectAllowList,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    pub gateway: GatewayConfig,

    /// Issuer to discover (default: `https://kubernetes.default.svc`).
    pub oidc_issuer_url: String,

    /// DNS bypass derived from `KUBERNETES_SERVICE_IP`.
    pub bypass: BypassPolicy,

    /// In-cluster identity source.
    pub cluster: ClusterIdentityResolver,

    /// Tolerance for `iat` in the future.
    pub jwt_clock_skew: Duration,

    pub jwks_cache_ttl: Duration,

    /// Graceful shutdown drain period.
    pub drain_period: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidJwksCacheTtl(String),

    #[error("Invalid drain period configuration: {0}")]
    InvalidDrainPeriod(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let expected_audience = vars
            .get("JWT_EXPECTED_AUDIENCE")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_EXPECTED_AUDIENCE".to_string()))?
            .to_string();

        let allowed_subjects = vars
            .get("JWT_ALLOWED_SUBJECTS")
            .map(|raw| SubjectAllowList::parse(raw))
            .unwrap_or_default();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let oidc_issuer_url = vars
            .get("OIDC_ISSUER_URL")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            let value = value.unsigned_abs();
            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let jwks_cache_ttl = if let Some(value_str) = vars.get("JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwksCacheTtl(format!(
                    "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwksCacheTtl(
                    "JWKS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                ));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CACHE_TTL
        };

        let drain_period = match vars.get("GATEWAY_DRAIN_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidDrainPeriod(format!(
                        "GATEWAY_DRAIN_SECONDS must be a non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                Duration::from_secs(value)
            }
            None => Duration::ZERO,
        };

        Ok(Config {
            bind_address,
            gateway: GatewayConfig {
                expected_audience,
                allowed_subjects,
            },
            oidc_issuer_url,
            bypass: BypassPolicy::from_vars(vars),
            cluster: ClusterIdentityResolver::from_vars(vars),
            jwt_clock_skew,
            jwks_cache_ttl,
            drain_period,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "JWT_EXPECTED_AUDIENCE".to_string(),
            "compass".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.gateway.expected_audience, "compass");
        assert!(config.gateway.allowed_subjects.is_empty());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.oidc_issuer_url, "https://kubernetes.default.svc");
        assert!(!config.bypass.is_enabled());
        assert_eq!(config.jwt_clock_skew, DEFAULT_CLOCK_SKEW);
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.drain_period, Duration::ZERO);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert(
            "JWT_ALLOWED_SUBJECTS".to_string(),
            "system:serviceaccount:a:b, system:serviceaccount:c:d".to_string(),
        );
        vars.insert(
            "OIDC_ISSUER_URL".to_string(),
            "https://issuer.example".to_string(),
        );
        vars.insert("KUBERNETES_SERVICE_IP".to_string(), "10.96.0.1".to_string());
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "120".to_string());
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "60".to_string());
        vars.insert("GATEWAY_DRAIN_SECONDS".to_string(), "15".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(
            config.gateway.allowed_subjects.iter().collect::<Vec<_>>(),
            vec!["system:serviceaccount:a:b", "system:serviceaccount:c:d"]
        );
        assert_eq!(config.oidc_issuer_url, "https://issuer.example");
        assert_eq!(config.bypass.target(), Some("10.96.0.1"));
        assert_eq!(config.jwt_clock_skew, Duration::from_secs(120));
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.drain_period, Duration::from_secs(15));
    }

    #[test]
    fn test_from_vars_missing_audience() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "JWT_EXPECTED_AUDIENCE")
        );

        let vars = HashMap::from([("JWT_EXPECTED_AUDIENCE".to_string(), "  ".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_jwt_clock_skew_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must be positive"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_rejects_negative() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "-100".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must be positive"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must not exceed 600"))
        );
    }

    #[test]
    fn test_jwt_clock_skew_accepts_max() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.jwt_clock_skew, Duration::from_secs(600));
    }

    #[test]
    fn test_jwt_clock_skew_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert(
            "JWT_CLOCK_SKEW_SECONDS".to_string(),
            "five-minutes".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwtClockSkew(msg)) if msg.contains("must be a valid integer"))
        );
    }

    #[test]
    fn test_jwks_cache_ttl_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidJwksCacheTtl(msg)) if msg.contains("must be greater than 0"))
        );
    }

    #[test]
    fn test_jwks_cache_ttl_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "soon".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwksCacheTtl(_))
        ));
    }

    #[test]
    fn test_drain_period_rejects_negative() {
        let mut vars = base_vars();
        vars.insert("GATEWAY_DRAIN_SECONDS".to_string(), "-1".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidDrainPeriod(_))
        ));
    }

    #[test]
    fn test_empty_bypass_target_disables_bypass() {
        let mut vars = base_vars();
        vars.insert("KUBERNETES_SERVICE_IP".to_string(), String::new());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert!(!config.bypass.is_enabled());
    }

    #[test]
    fn test_debug_hides_allowed_subjects() {
        let mut vars = base_vars();
        vars.insert(
            "JWT_ALLOWED_SUBJECTS".to_string(),
            "system:serviceaccount:hidden:caller".to_string(),
        );
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{:?}", config);

        assert!(!debug_output.contains("hidden:caller"));
    }
}
