/// Email confirmation endpoint
use crate::{
    api::{hal::Resource, middleware::require_client, users::user_href},
    auth::AuthenticatedAccount,
    context::AppContext,
    error::{IdentityError, IdentityResult},
    oauth::TokenResponse,
};
use axum::{
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new().route(
        "/v1/confirmations/:reference",
        get(confirm_email).route_layer(from_fn_with_state(ctx, require_client)),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub autologin: bool,
}

/// GET /v1/confirmations/:reference
///
/// With `?autologin=true` the response is a token pair for the confirmed user.
async fn confirm_email(
    State(ctx): State<AppContext>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Path(reference): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> IdentityResult<Response> {
    let confirmation = ctx.store.find_confirmation_by_reference(&reference).await?;

    let owner = ctx.store.find_user_by_id(&confirmation.user_id).await?;
    if owner.account_id != account.id {
        return Err(IdentityError::NotFound("Confirmation"));
    }

    let user = ctx.accounts.confirm_user(&confirmation).await?;

    if query.autologin {
        let client = ctx.oauth.find_client_by_id(&account.oauth_client_id).await?;
        let oauth_user = ctx.oauth.find_user_by_id(&user.oauth_user_id).await?;
        let scope = ctx.oauth.get_scope("").await?;
        let (access_token, refresh_token) = ctx.oauth.login(&client, &oauth_user, &scope).await?;

        let response = TokenResponse::new(
            &access_token,
            Some(&refresh_token),
            ctx.config.oauth.access_token_lifetime,
        );
        return Ok(Json(response).into_response());
    }

    let href = user_href(&user);
    Ok(Json(Resource::new(user, href)).into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    async fn reference_for(app: &TestApp, user_id: &str) -> String {
        sqlx::query_scalar("SELECT reference FROM confirmations WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&app.ctx.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bogus_reference() {
        let app = TestApp::spawn().await;

        let response = app
            .request(
                Method::GET,
                "/v1/confirmations/bogus",
                Some(&app.client_auth()),
                None,
            )
            .await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body, json!({ "error": "Confirmation not found" }));
    }

    #[tokio::test]
    async fn test_confirm_email() {
        let app = TestApp::spawn().await;
        let (john, _) = app.user_with_token("john@example.com").await;
        let path = format!("/v1/confirmations/{}", reference_for(&app, &john.id).await);

        let response = app
            .request(Method::GET, &path, Some(&app.client_auth()), None)
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["id"], john.id.as_str());
        assert_eq!(response.body["confirmed"], true);

        let response = app
            .request(Method::GET, &path, Some(&app.client_auth()), None)
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_confirm_with_autologin() {
        let app = TestApp::spawn().await;
        let (john, _) = app.user_with_token("john@example.com").await;
        let path = format!(
            "/v1/confirmations/{}?autologin=true",
            reference_for(&app, &john.id).await
        );

        let response = app
            .request(Method::GET, &path, Some(&app.client_auth()), None)
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["token_type"], "Bearer");
        assert_eq!(response.body["user_id"], john.oauth_user_id.as_str());

        let token = format!("Bearer {}", response.body["access_token"].as_str().unwrap());
        let response = app.request(Method::GET, "/v1/me", Some(&token), None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["id"], john.id.as_str());
    }
}
