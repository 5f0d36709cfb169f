//! Authentication middleware for protected routes.
//!
//! Runs the [`AuthGateway`] on every request and injects the verified
//! claims into request extensions.

use crate::auth::Claims;
use crate::errors::Rejection;
use crate::gateway::{AuthGateway, AuthOutcome};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub gateway: Arc<AuthGateway>,
}

/// Authentication middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 Unauthorized with `WWW-Authenticate` if the token is missing or invalid
/// - 503 Service Unavailable if the gateway could not be constructed
/// - Otherwise continues to the next handler with [`Claims`] in extensions
#[instrument(skip(state, req, next), name = "sa.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, Rejection> {
    let outcome = state.gateway.authenticate(req.headers()).await;

    match outcome {
        AuthOutcome::Authenticated(claims) => {
            tracing::debug!(target: "sa.middleware.auth", "Request authenticated");
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        AuthOutcome::Rejected(rejection) => Err(rejection),
    }
}

/// Extension trait for reading the authenticated claims from a request.
pub trait ClaimsExt {
    /// Returns `None` if the auth middleware did not run for this request.
    fn claims(&self) -> Option<&Claims>;
}

impl<B> ClaimsExt for axum::extract::Request<B> {
    fn claims(&self) -> Option<&Claims> {
        self.extensions().get::<Claims>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{SubjectAllowList, TokenVerifier, VerifiedToken};
    use crate::config::GatewayConfig;
    use crate::errors::VerifyError;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Accepts exactly the token "good".
    struct FixedVerifier;

    #[async_trait]
    impl TokenVerifier for FixedVerifier {
        async fn verify(&self, raw_token: &str) -> Result<VerifiedToken, VerifyError> {
            if raw_token != "good" {
                return Err(VerifyError::InvalidSignature);
            }
            let claims = serde_json::json!({
                "sub": "system:serviceaccount:default:builder",
                "exp": 4_102_444_800_i64
            });
            Ok(VerifiedToken::from_claims(
                claims.as_object().cloned().unwrap_or_default(),
            ))
        }
    }

    async fn echo_subject(req: Request) -> String {
        req.claims()
            .and_then(|c| c.sub.clone())
            .unwrap_or_else(|| "none".to_string())
    }

    fn app(gateway: AuthGateway) -> Router {
        let auth_state = Arc::new(AuthState {
            gateway: Arc::new(gateway),
        });
        Router::new()
            .route("/protected", get(echo_subject))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    fn gateway_config() -> GatewayConfig {
        GatewayConfig {
            expected_audience: "compass".to_string(),
            allowed_subjects: SubjectAllowList::default(),
        }
    }

    fn request(auth: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/protected");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_claims_reach_handler() {
        let gateway = AuthGateway::new(gateway_config(), Arc::new(FixedVerifier));

        let response = app(gateway).oneshot(request(Some("Bearer good"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response.into_body()).await,
            "system:serviceaccount:default:builder"
        );
    }

    #[tokio::test]
    async fn test_rejection_short_circuits() {
        let gateway = AuthGateway::new(gateway_config(), Arc::new(FixedVerifier));

        let response = app(gateway).oneshot(request(Some("Bearer bad"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            body_string(response.into_body()).await,
            r#"{"error":"invalid token: failed to verify signature"}"#
        );
    }

    #[tokio::test]
    async fn test_unavailable_gateway_returns_503() {
        let gateway = AuthGateway::unavailable(gateway_config());

        let response = app(gateway).oneshot(request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
