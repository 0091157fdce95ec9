/// OAuth2 token and introspection endpoints
use crate::{
    api::middleware::{enforce_https, extract_basic_credentials, require_client_or_user},
    auth::Identity,
    context::AppContext,
    error::{IdentityError, IdentityResult},
    oauth::{IntrospectRequest, IntrospectResponse, TokenRequest, TokenResponse},
};
use axum::{
    extract::State,
    http::HeaderMap,
    middleware::from_fn_with_state,
    response::Json,
    routing::post,
    Form, Router,
};
use chrono::Utc;

pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .route(
            "/v1/oauth/tokens",
            post(issue_token).route_layer(from_fn_with_state(ctx.clone(), enforce_https)),
        )
        .route(
            "/v1/oauth/introspect",
            post(introspect).route_layer(from_fn_with_state(ctx, require_client_or_user)),
        )
}

/// POST /v1/oauth/tokens
///
/// The client always authenticates with basic auth here, bearer tokens are not
/// accepted.
async fn issue_token(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> IdentityResult<Json<TokenResponse>> {
    let (key, secret) =
        extract_basic_credentials(&headers).ok_or(IdentityError::ClientAuthenticationRequired)?;
    let client = ctx.oauth.auth_client(&key, &secret).await?;
    let lifetime = ctx.config.oauth.access_token_lifetime;
    let requested_scope = request.scope.as_deref().unwrap_or("");

    let response = match request.grant_type.as_str() {
        "password" => {
            let (Some(username), Some(password)) = (&request.username, &request.password) else {
                return Err(IdentityError::InvalidGrant(
                    "Username and password are required".to_string(),
                ));
            };

            let oauth_user = ctx.oauth.auth_user(username, password).await?;

            // Identities only log in through their own account's client
            let invalid =
                || IdentityError::InvalidGrant("Invalid username or password".to_string());
            let user = match ctx.store.find_user_by_oauth_user_id(&oauth_user.id).await {
                Ok(user) => user,
                Err(IdentityError::NotFound(_)) => return Err(invalid()),
                Err(e) => return Err(e),
            };
            let account = ctx.store.find_account_by_oauth_client_id(&client.id).await?;
            if user.account_id != account.id {
                return Err(invalid());
            }

            let scope = ctx.oauth.get_scope(requested_scope).await?;
            let (access_token, refresh_token) = ctx.oauth.login(&client, &oauth_user, &scope).await?;
            TokenResponse::new(&access_token, Some(&refresh_token), lifetime)
        }
        "client_credentials" => {
            let scope = ctx.oauth.get_scope(requested_scope).await?;
            let access_token = ctx.oauth.grant_access_token(&client, None, &scope).await?;
            TokenResponse::new(&access_token, None, lifetime)
        }
        "refresh_token" => {
            let token = request.refresh_token.as_deref().ok_or_else(|| {
                IdentityError::InvalidGrant("Refresh token is required".to_string())
            })?;
            let (access_token, refresh_token) =
                ctx.oauth.refresh(&client, token, requested_scope).await?;
            TokenResponse::new(&access_token, Some(&refresh_token), lifetime)
        }
        _ => return Err(IdentityError::UnsupportedGrantType),
    };

    tracing::debug!(client = %client.key, grant_type = %request.grant_type, "Token issued");
    Ok(Json(response))
}

/// POST /v1/oauth/introspect
///
/// Tokens issued to another account's client introspect as inactive.
async fn introspect(
    State(ctx): State<AppContext>,
    identity: Identity,
    Form(request): Form<IntrospectRequest>,
) -> IdentityResult<Json<IntrospectResponse>> {
    let account = match (identity.account, identity.user) {
        (Some(account), _) => account,
        (None, Some(user)) => ctx.store.find_account_by_id(&user.account_id).await?,
        (None, None) => return Err(IdentityError::ClientOrUserAuthenticationRequired),
    };

    let access_token = match ctx.oauth.find_access_token(&request.token).await {
        Ok(token) => token,
        Err(IdentityError::InvalidGrant(_)) => return Ok(Json(IntrospectResponse::default())),
        Err(e) => return Err(e),
    };

    let same_account = access_token.client_id.as_deref() == Some(account.oauth_client_id.as_str());
    if !same_account || access_token.expires_at <= Utc::now() {
        return Ok(Json(IntrospectResponse::default()));
    }

    let username = match &access_token.user_id {
        Some(user_id) => Some(ctx.oauth.find_user_by_id(user_id).await?.username),
        None => None,
    };
    let client = ctx.oauth.find_client_by_id(&account.oauth_client_id).await?;

    Ok(Json(IntrospectResponse {
        active: true,
        scope: Some(access_token.scope),
        client_id: Some(client.key),
        username,
        token_type: Some("Bearer".to_string()),
        exp: Some(access_token.expires_at.timestamp()),
    }))
}
