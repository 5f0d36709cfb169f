//! JWT claims structure.
//!
//! Contains the claims extracted from verified service-account tokens. The
//! `sub` field is redacted in Debug output to prevent exposure in logs.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `aud` claim: a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud.clone()],
            Audience::Many(auds) => auds.clone(),
        }
    }
}

/// Namespace and service account a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KubernetesIdentity {
    pub namespace: String,
    pub service_account: String,
}

const SERVICE_ACCOUNT_SUBJECT_PREFIX: &str = "system:serviceaccount:";

/// Claims of a verified token.
///
/// Every claim other than the registered ones lands in `extra`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - redacted in Debug output. `None` if absent or not a string.
    #[serde(default, deserialize_with = "string_or_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration timestamp (Unix epoch seconds, fraction truncated).
    #[serde(deserialize_with = "required_numeric_date")]
    pub exp: i64,

    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Seconds of a NumericDate. Non-integer values are truncated toward zero.
pub(crate) fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}

fn required_numeric_date<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    numeric_date(&value).ok_or_else(|| de::Error::custom("expected a numeric date"))
}

fn optional_numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => numeric_date(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom("expected a numeric date")),
    }
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

impl Claims {
    /// Decode claims from a verified claims map.
    ///
    /// # Errors
    ///
    /// Fails if a registered claim has the wrong type (e.g. a string `exp`).
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map.clone()))
    }

    /// Namespace and service account of the caller.
    ///
    /// Read from the `kubernetes.io` claim of projected tokens, falling back to
    /// a `system:serviceaccount:<namespace>:<name>` subject.
    pub fn kubernetes_identity(&self) -> Option<KubernetesIdentity> {
        self.identity_from_claim()
            .or_else(|| self.sub.as_deref().and_then(identity_from_subject))
    }

    fn identity_from_claim(&self) -> Option<KubernetesIdentity> {
        let k8s = self.extra.get("kubernetes.io")?;
        let namespace = k8s.get("namespace")?.as_str()?;
        let service_account = k8s.get("serviceaccount")?.get("name")?.as_str()?;
        Some(KubernetesIdentity {
            namespace: namespace.to_string(),
            service_account: service_account.to_string(),
        })
    }
}

fn identity_from_subject(subject: &str) -> Option<KubernetesIdentity> {
    let rest = subject.strip_prefix(SERVICE_ACCOUNT_SUBJECT_PREFIX)?;
    let (namespace, service_account) = rest.split_once(':')?;
    if namespace.is_empty() || service_account.is_empty() || service_account.contains(':') {
        return None;
    }
    Some(KubernetesIdentity {
        namespace: namespace.to_string(),
        service_account: service_account.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_from(value: Value) -> Result<Claims, serde_json::Error> {
        match value {
            Value::Object(map) => Claims::from_map(&map),
            _ => panic!("test claims must be an object"),
        }
    }

    #[test]
    fn test_projected_token_claims() {
        let claims = claims_from(json!({
            "aud": ["compass"],
            "exp": 1_700_003_600,
            "iat": 1_700_000_000,
            "nbf": 1_700_000_000,
            "iss": "https://kubernetes.default.svc",
            "sub": "system:serviceaccount:payments:api",
            "kubernetes.io": {
                "namespace": "payments",
                "serviceaccount": {"name": "api", "uid": "8d3c"},
                "pod": {"name": "api-7f9", "uid": "aa11"}
            }
        }))
        .unwrap();

        assert_eq!(claims.sub.as_deref(), Some("system:serviceaccount:payments:api"));
        assert_eq!(claims.aud.as_ref().unwrap().to_vec(), vec!["compass".to_string()]);
        assert_eq!(claims.exp, 1_700_003_600);
        assert!(claims.extra.contains_key("kubernetes.io"));
        assert_eq!(
            claims.kubernetes_identity(),
            Some(KubernetesIdentity {
                namespace: "payments".to_string(),
                service_account: "api".to_string(),
            })
        );
    }

    #[test]
    fn test_non_string_sub_is_none() {
        let claims = claims_from(json!({"sub": 42, "exp": 1})).unwrap();
        assert!(claims.sub.is_none());

        let claims = claims_from(json!({"exp": 1})).unwrap();
        assert!(claims.sub.is_none());
    }

    #[test]
    fn test_wrong_exp_type_fails() {
        assert!(claims_from(json!({"sub": "a", "exp": "tomorrow"})).is_err());
        assert!(claims_from(json!({"sub": "a"})).is_err());
    }

    #[test]
    fn test_fractional_dates_are_truncated() {
        let claims = claims_from(json!({
            "exp": 1_700_003_600.75,
            "nbf": 1_700_000_000.5,
            "iat": 1.7e9
        }))
        .unwrap();

        assert_eq!(claims.exp, 1_700_003_600);
        assert_eq!(claims.nbf, Some(1_700_000_000));
        assert_eq!(claims.iat, Some(1_700_000_000));
    }

    #[test]
    fn test_null_optional_dates_are_none() {
        let claims = claims_from(json!({"exp": 1, "nbf": null})).unwrap();

        assert!(claims.nbf.is_none());
        assert!(claims.iat.is_none());
        assert!(claims_from(json!({"exp": 1, "iat": "yesterday"})).is_err());
    }

    #[test]
    fn test_audience_string_or_list() {
        let one: Audience = serde_json::from_value(json!("compass")).unwrap();
        assert_eq!(one, Audience::One("compass".to_string()));
        assert_eq!(one.to_vec(), vec!["compass".to_string()]);

        let many: Audience = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(many.to_vec(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_identity_from_subject_fallback() {
        let claims = claims_from(json!({
            "sub": "system:serviceaccount:default:worker",
            "exp": 1
        }))
        .unwrap();

        let identity = claims.kubernetes_identity().unwrap();
        assert_eq!(identity.namespace, "default");
        assert_eq!(identity.service_account, "worker");
    }

    #[test]
    fn test_identity_absent_for_other_subjects() {
        assert!(identity_from_subject("alice").is_none());
        assert!(identity_from_subject("system:serviceaccount:ns").is_none());
        assert!(identity_from_subject("system:serviceaccount::name").is_none());
        assert!(identity_from_subject("system:serviceaccount:ns:a:b").is_none());
    }

    #[test]
    fn test_claims_debug_redacts_sub() {
        let claims = claims_from(json!({
            "sub": "system:serviceaccount:secret-ns:secret-sa",
            "exp": 1
        }))
        .unwrap();

        let debug_str = format!("{:?}", claims);

        assert!(
            !debug_str.contains("secret-ns"),
            "Debug output should not contain actual sub value"
        );
        assert!(
            debug_str.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
    }
}
