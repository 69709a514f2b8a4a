//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, validates it
//! against the configured Ed25519 key, and injects `UserClaims` into request
//! extensions for downstream handlers.

use crate::auth::JwtValidator;
use crate::errors::CcError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_validator: Arc<JwtValidator>,
}

/// Extract Bearer token from the Authorization header.
///
/// Shared by `require_auth` and the WebSocket upgrade handler.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, CcError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "cc.middleware.auth", "Missing Authorization header");
            CcError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "cc.middleware.auth", "Invalid Authorization header format");
        CcError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware for user tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if token is missing or invalid
/// - Continues to next handler with `UserClaims` in extensions if token is valid
#[instrument(skip_all, name = "cc.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CcError> {
    let token = extract_bearer_token(req.headers())?;

    let claims = state.jwt_validator.validate(token)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use cc_test_utils::{test_signing_key, TestTokenBuilder};
    use common::jwt::{UserClaims, DEFAULT_CLOCK_SKEW};
    use tower::ServiceExt;

    async fn whoami(Extension(claims): Extension<UserClaims>) -> String {
        claims.sub
    }

    fn test_app() -> Router {
        let key = test_signing_key(1).unwrap();
        let state = Arc::new(AuthState {
            jwt_validator: Arc::new(
                JwtValidator::new(&key.public_key_x, DEFAULT_CLOCK_SKEW).unwrap(),
            ),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn request(auth: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method("GET").uri("/whoami");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).expect("request builder should succeed")
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let key = test_signing_key(1).unwrap();
        let token = TestTokenBuilder::new().for_user(7).sign(&key);

        let response = test_app()
            .oneshot(request(Some(&format!("Bearer {token}"))))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = test_app()
            .oneshot(request(None))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn test_token_from_other_key_is_unauthorized() {
        let other = test_signing_key(9).unwrap();
        let token = TestTokenBuilder::new().for_user(7).sign(&other);

        let response = test_app()
            .oneshot(request(Some(&format!("Bearer {token}"))))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
