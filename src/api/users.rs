/// User endpoints
use crate::{
    account::{UpdateUserRequest, UserRequest},
    api::{
        hal::{page_links, EmbeddedUsers, PageQuery, Resource, UserPage},
        middleware::{require_client, require_user},
    },
    auth::{AuthenticatedAccount, AuthenticatedUser},
    context::AppContext,
    db::models::User,
    error::{IdentityError, IdentityResult},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};

pub fn routes(ctx: AppContext) -> Router<AppContext> {
    let client = from_fn_with_state(ctx.clone(), require_client);
    let user = from_fn_with_state(ctx, require_user);

    Router::new()
        .route(
            "/v1/users",
            post(create_user)
                .route_layer(client)
                .merge(get(list_users).route_layer(user.clone())),
        )
        .route("/v1/me", get(get_me).route_layer(user.clone()))
        .route(
            "/v1/users/:id",
            get(get_user).put(update_user).route_layer(user),
        )
}

pub fn user_href(user: &User) -> String {
    format!("/v1/users/{}", user.id)
}

/// Self, or a superuser of the same account
fn authorize(caller: &User, target: &User) -> IdentityResult<()> {
    if caller.id == target.id || (caller.is_superuser() && caller.account_id == target.account_id)
    {
        Ok(())
    } else {
        Err(IdentityError::PermissionDenied(
            "Not allowed to access this user".to_string(),
        ))
    }
}

/// POST /v1/users
async fn create_user(
    State(ctx): State<AppContext>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Json(request): Json<UserRequest>,
) -> IdentityResult<impl IntoResponse> {
    let user = ctx.accounts.create_user(&account, &request).await?;
    let href = user_href(&user);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, href.clone())],
        Json(Resource::new(user, href)),
    ))
}

/// GET /v1/me
async fn get_me(AuthenticatedUser(user): AuthenticatedUser) -> Json<Resource<User>> {
    let href = user_href(&user);
    Json(Resource::new(user, href))
}

/// GET /v1/users/:id
async fn get_user(
    State(ctx): State<AppContext>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Path(id): Path<String>,
) -> IdentityResult<Json<Resource<User>>> {
    let target = ctx.store.find_user_by_id(&id).await?;
    authorize(&caller, &target)?;

    let href = user_href(&target);
    Ok(Json(Resource::new(target, href)))
}

/// PUT /v1/users/:id
async fn update_user(
    State(ctx): State<AppContext>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> IdentityResult<Json<Resource<User>>> {
    let target = ctx.store.find_user_by_id(&id).await?;
    authorize(&caller, &target)?;

    let updated = ctx.accounts.update_user(&target, &request).await?;
    let href = user_href(&updated);
    Ok(Json(Resource::new(updated, href)))
}

/// GET /v1/users, superusers only
async fn list_users(
    State(ctx): State<AppContext>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Query(query): Query<PageQuery>,
) -> IdentityResult<Json<UserPage<Resource<User>>>> {
    if !caller.is_superuser() {
        return Err(IdentityError::PermissionDenied(
            "Superuser role required".to_string(),
        ));
    }

    let (users, total) = ctx
        .store
        .list_users(&caller.account_id, query.offset(), query.limit())
        .await?;

    let users = users
        .into_iter()
        .map(|user| {
            let href = user_href(&user);
            Resource::new(user, href)
        })
        .collect();

    Ok(Json(UserPage {
        links: page_links("/v1/users", &query, total),
        embedded: EmbeddedUsers { users },
        count: total,
        page: query.page(),
    }))
}
