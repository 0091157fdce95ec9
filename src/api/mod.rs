/// API routes and handlers
pub mod confirmations;
pub mod hal;
pub mod invitations;
pub mod middleware;
pub mod oauth;
pub mod password_resets;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes; each group layers its own auth middleware
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .merge(users::routes(ctx.clone()))
        .merge(invitations::routes(ctx.clone()))
        .merge(confirmations::routes(ctx.clone()))
        .merge(password_resets::routes(ctx.clone()))
        .merge(oauth::routes(ctx))
}
