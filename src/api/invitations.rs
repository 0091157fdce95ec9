/// Invitation endpoints
use crate::{
    account::{validate_request, InvitationRequest, PasswordRequest},
    api::{
        hal::Resource,
        middleware::{require_client, require_user},
        users::user_href,
    },
    auth::{AuthenticatedAccount, AuthenticatedUser},
    context::AppContext,
    db::models::{Invitation, User},
    error::{IdentityError, IdentityResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};

pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .route(
            "/v1/invitations",
            post(invite_user).route_layer(from_fn_with_state(ctx.clone(), require_user)),
        )
        .route(
            "/v1/invitations/:reference",
            post(confirm_invitation).route_layer(from_fn_with_state(ctx, require_client)),
        )
}

/// POST /v1/invitations
async fn invite_user(
    State(ctx): State<AppContext>,
    AuthenticatedUser(inviter): AuthenticatedUser,
    Json(request): Json<InvitationRequest>,
) -> IdentityResult<impl IntoResponse> {
    let invitation = ctx.accounts.invite_user(&inviter, &request).await?;
    let href = format!("/v1/invitations/{}", invitation.id);

    Ok((StatusCode::CREATED, Json(Resource::new(invitation, href))))
}

/// POST /v1/invitations/:reference
async fn confirm_invitation(
    State(ctx): State<AppContext>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Path(reference): Path<String>,
    Json(request): Json<PasswordRequest>,
) -> IdentityResult<Json<Resource<User>>> {
    validate_request(&request)?;

    let invitation: Invitation = ctx.store.find_invitation_by_reference(&reference).await?;

    // Other tenants' references do not exist for this client
    let invited = ctx.store.find_user_by_id(&invitation.invited_user_id).await?;
    if invited.account_id != account.id {
        return Err(IdentityError::NotFound("Invitation"));
    }

    let user = ctx
        .accounts
        .confirm_invitation(&invitation, &request.password)
        .await?;

    let href = user_href(&user);
    Ok(Json(Resource::new(user, href)))
}
