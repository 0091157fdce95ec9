/// Authentication middleware and header parsing
///
/// Four variants guard the routes: client-required, user-required,
/// user-optional and client-or-user. Each first applies the HTTPS policy, then
/// resolves credentials once and caches the `Resolution` in the request
/// extensions for the extractors in `crate::auth`.

use crate::{
    auth::{request_resolution, Resolution},
    config::SecurityConfig,
    context::AppContext,
    error::IdentityError,
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{HeaderMapExt, Host};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();

    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract `(key, secret)` from a Basic Authorization header
pub fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?.trim();

    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (key, secret) = decoded.split_once(':')?;

    if key.is_empty() {
        return None;
    }

    Some((key.to_string(), secret.to_string()))
}

/// Redirect plain-HTTP requests to HTTPS when the policy demands it
///
/// TLS terminates at the proxy, so the scheme comes from `X-Forwarded-Proto`.
pub fn https_redirect(security: &SecurityConfig, req: &Request) -> Option<Response> {
    if !security.force_https {
        return None;
    }

    let proto = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    if proto.eq_ignore_ascii_case("https") {
        return None;
    }

    let host = req.headers().typed_get::<Host>()?;
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let location = format!("https://{}{}", host.hostname(), path);
    let location = HeaderValue::from_str(&location).ok()?;

    tracing::debug!("Redirecting to HTTPS");
    Some((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response())
}

async fn resolve_once(ctx: &AppContext, req: Request) -> (Request, Arc<Resolution>) {
    let (mut parts, body) = req.into_parts();
    let resolution = request_resolution(&mut parts, ctx).await;
    (Request::from_parts(parts, body), resolution)
}

/// HTTPS policy only, for routes that authenticate in the handler
pub async fn enforce_https(State(ctx): State<AppContext>, req: Request, next: Next) -> Response {
    if let Some(redirect) = https_redirect(&ctx.config.security, &req) {
        return redirect;
    }

    next.run(req).await
}

/// Require a resolved Account (client basic auth or any valid token)
pub async fn require_client(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(redirect) = https_redirect(&ctx.config.security, &req) {
        return redirect;
    }

    let (req, resolution) = resolve_once(&ctx, req).await;
    if resolution.account.is_none() {
        return IdentityError::ClientAuthenticationRequired.into_response();
    }

    next.run(req).await
}

/// Require a resolved User
pub async fn require_user(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(redirect) = https_redirect(&ctx.config.security, &req) {
        return redirect;
    }

    let (req, resolution) = resolve_once(&ctx, req).await;
    if resolution.user.is_none() {
        return IdentityError::UserAuthenticationRequired.into_response();
    }

    next.run(req).await
}

/// Attach whatever resolves; never rejects
pub async fn optional_user(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(redirect) = https_redirect(&ctx.config.security, &req) {
        return redirect;
    }

    let (req, _) = resolve_once(&ctx, req).await;
    next.run(req).await
}

/// Require either a resolved Account or a resolved User
pub async fn require_client_or_user(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(redirect) = https_redirect(&ctx.config.security, &req) {
        return redirect;
    }

    let (req, resolution) = resolve_once(&ctx, req).await;
    if resolution.account.is_none() && resolution.user.is_none() {
        return IdentityError::ClientOrUserAuthenticationRequired.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::test_support::TestApp, auth::Identity};
    use axum::{
        body::{to_bytes, Body},
        middleware::from_fn_with_state,
        response::Json,
        routing::get,
        Router,
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&headers_with("Bearer abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(extract_bearer_token(&headers_with("Bearer    ")), None);
        assert_eq!(extract_bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_extract_basic_credentials() {
        let encoded = STANDARD.encode("test_client:test:secret");
        let headers = headers_with(&format!("Basic {}", encoded));
        assert_eq!(
            extract_basic_credentials(&headers),
            Some(("test_client".to_string(), "test:secret".to_string()))
        );

        assert_eq!(extract_basic_credentials(&headers_with("Basic !!!")), None);
        assert_eq!(extract_basic_credentials(&headers_with("Bearer abc")), None);
    }

    #[test]
    fn test_https_redirect() {
        let security = SecurityConfig { force_https: true };

        let req = Request::builder()
            .uri("/v1/me?x=1")
            .header(header::HOST, "id.example.com")
            .body(Body::empty())
            .unwrap();
        let response = https_redirect(&security, &req).unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://id.example.com/v1/me?x=1"
        );

        let req = Request::builder()
            .uri("/v1/me")
            .header(header::HOST, "id.example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        assert!(https_redirect(&security, &req).is_none());

        let relaxed = SecurityConfig { force_https: false };
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert!(https_redirect(&relaxed, &req).is_none());
    }

    async fn probe(identity: Identity) -> Json<serde_json::Value> {
        Json(json!({
            "account": identity.account.is_some(),
            "user": identity.user.is_some(),
        }))
    }

    fn probe_router(ctx: &AppContext) -> Router {
        Router::new()
            .route(
                "/client",
                get(probe).route_layer(from_fn_with_state(ctx.clone(), require_client)),
            )
            .route(
                "/user",
                get(probe).route_layer(from_fn_with_state(ctx.clone(), require_user)),
            )
            .route(
                "/optional",
                get(probe).route_layer(from_fn_with_state(ctx.clone(), optional_user)),
            )
            .route(
                "/either",
                get(probe).route_layer(from_fn_with_state(ctx.clone(), require_client_or_user)),
            )
            .with_state(ctx.clone())
    }

    async fn call(router: &Router, uri: &str, auth: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_variants_without_credentials() {
        let app = TestApp::spawn().await;
        let router = probe_router(&app.ctx);

        let (status, body) = call(&router, "/client", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Client authentication required" }));

        let (status, body) = call(&router, "/user", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "User authentication required" }));

        let (status, body) = call(&router, "/either", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Client or user authentication required" }));

        let (status, body) = call(&router, "/optional", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "account": false, "user": false }));
    }

    #[tokio::test]
    async fn test_variants_with_credentials() {
        let app = TestApp::spawn().await;
        let router = probe_router(&app.ctx);
        let client = app.client_auth();
        let (_, token) = app.user_with_token("john@example.com").await;

        let (status, _) = call(&router, "/user", Some(&client)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&router, "/either", Some(&client)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "account": true, "user": false }));

        let (status, body) = call(&router, "/optional", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "account": true, "user": true }));

        let (status, body) = call(&router, "/optional", Some("Bearer bogus")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "account": false, "user": false }));
    }
}
