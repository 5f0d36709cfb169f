//! Current caller handler.
//!
//! Returns information about the authenticated service account.

use crate::auth::Claims;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/v1/me` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Token subject, if the token carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    pub audience: Vec<String>,

    /// Token expiration timestamp.
    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

impl From<Claims> for MeResponse {
    fn from(claims: Claims) -> Self {
        let identity = claims.kubernetes_identity();
        Self {
            audience: claims.aud.as_ref().map(|a| a.to_vec()).unwrap_or_default(),
            exp: claims.exp,
            namespace: identity.as_ref().map(|i| i.namespace.clone()),
            service_account: identity.map(|i| i.service_account),
            sub: claims.sub,
        }
    }
}

/// Handler for GET /api/v1/me
///
/// ## Response
///
/// ```json
/// {
///   "sub": "system:serviceaccount:payments:api",
///   "audience": ["compass"],
///   "exp": 1234567890,
///   "namespace": "payments",
///   "service_account": "api"
/// }
/// ```
#[instrument(skip_all, name = "sa.handlers.me")]
pub async fn get_me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    tracing::debug!(target: "sa.handlers.me", "Returning caller claims");
    Json(MeResponse::from(claims))
}
