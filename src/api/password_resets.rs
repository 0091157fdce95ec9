/// Password reset endpoints
use crate::{
    account::{validate_request, PasswordRequest, PasswordResetRequest},
    api::middleware::require_client,
    auth::AuthenticatedAccount,
    context::AppContext,
    error::{IdentityError, IdentityResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Json,
    routing::post,
    Router,
};

pub fn routes(ctx: AppContext) -> Router<AppContext> {
    let client = from_fn_with_state(ctx, require_client);

    Router::new()
        .route(
            "/v1/password-resets",
            post(request_password_reset).route_layer(client.clone()),
        )
        .route(
            "/v1/password-resets/:reference",
            post(reset_password).route_layer(client),
        )
}

/// POST /v1/password-resets
///
/// Always 204 so callers cannot learn which addresses are registered.
async fn request_password_reset(
    State(ctx): State<AppContext>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Json(request): Json<PasswordResetRequest>,
) -> IdentityResult<StatusCode> {
    validate_request(&request)?;

    match ctx.store.find_user_by_email(&request.email).await {
        Ok(user) if user.account_id == account.id => {
            ctx.accounts.create_password_reset(&user).await?;
        }
        Ok(_) | Err(IdentityError::NotFound(_)) => {
            tracing::debug!(account = %account.id, "Password reset requested for unknown address");
        }
        Err(e) => return Err(e),
    }

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/password-resets/:reference
async fn reset_password(
    State(ctx): State<AppContext>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Path(reference): Path<String>,
    Json(request): Json<PasswordRequest>,
) -> IdentityResult<StatusCode> {
    validate_request(&request)?;

    let reset = ctx.store.find_password_reset_by_reference(&reference).await?;

    let owner = ctx.store.find_user_by_id(&reset.user_id).await?;
    if owner.account_id != account.id {
        return Err(IdentityError::NotFound("Password reset"));
    }

    ctx.accounts.reset_password(&reset, &request.password).await?;

    Ok(StatusCode::NO_CONTENT)
}
