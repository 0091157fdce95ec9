/// Credential resolution and authentication extractors
///
/// A request carries either a bearer access token or client basic auth. The
/// resolver turns those headers into an (Account, User) pair; every failure is
/// collapsed into one of two generic errors so callers cannot probe which part
/// of a credential was wrong. The precise cause is only logged at debug level.

use crate::{
    account::AccountStore,
    api::middleware::{extract_basic_credentials, extract_bearer_token},
    context::AppContext,
    db::models::{Account, User},
    error::IdentityError,
    metrics,
    oauth::OAuthService,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::sync::Arc;

/// Why a resolution produced no identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Neither a bearer token nor basic auth was supplied
    MissingCredentials,
    /// The bearer token, or something it points at, did not check out
    InvalidBearer,
    /// Client key/secret did not check out
    InvalidBasic,
}

/// Outcome of resolving one request's credentials
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub account: Option<Account>,
    pub user: Option<User>,
    pub failure: Option<AuthFailure>,
}

impl Resolution {
    fn failed(failure: AuthFailure) -> Self {
        Self {
            account: None,
            user: None,
            failure: Some(failure),
        }
    }
}

/// Resolves request headers to the calling Account and User
pub struct CredentialResolver {
    oauth: Arc<OAuthService>,
    store: Arc<AccountStore>,
}

impl CredentialResolver {
    pub fn new(oauth: Arc<OAuthService>, store: Arc<AccountStore>) -> Self {
        Self { oauth, store }
    }

    /// Resolve credentials; bearer tokens take precedence over basic auth
    pub async fn resolve(&self, headers: &HeaderMap) -> Resolution {
        if let Some(token) = extract_bearer_token(headers) {
            let resolution = self.resolve_bearer(&token).await;
            metrics::record_auth_resolution("bearer", resolution.failure.is_none());
            return resolution;
        }

        if let Some((key, secret)) = extract_basic_credentials(headers) {
            let resolution = self.resolve_basic(&key, &secret).await;
            metrics::record_auth_resolution("basic", resolution.failure.is_none());
            return resolution;
        }

        metrics::record_auth_resolution("none", false);
        Resolution::failed(AuthFailure::MissingCredentials)
    }

    async fn resolve_bearer(&self, token: &str) -> Resolution {
        let access_token = match self.oauth.authenticate(token).await {
            Ok(access_token) => access_token,
            Err(e) => {
                log_cause("access token rejected", &e);
                return Resolution::failed(AuthFailure::InvalidBearer);
            }
        };

        if access_token.client_id.is_none() && access_token.user_id.is_none() {
            tracing::debug!("Access token references neither client nor user");
            return Resolution::failed(AuthFailure::InvalidBearer);
        }

        let mut resolution = Resolution::default();

        if let Some(client_id) = &access_token.client_id {
            match self.store.find_account_by_oauth_client_id(client_id).await {
                Ok(account) => resolution.account = Some(account),
                Err(e) => {
                    log_cause("no account for token client", &e);
                    return Resolution::failed(AuthFailure::InvalidBearer);
                }
            }
        }

        let Some(oauth_user_id) = &access_token.user_id else {
            return resolution;
        };

        match self.store.find_user_by_oauth_user_id(oauth_user_id).await {
            Ok(user) => resolution.user = Some(user),
            Err(e) => {
                // Account stays resolved
                log_cause("no user for token identity", &e);
                resolution.failure = Some(AuthFailure::InvalidBearer);
            }
        }

        resolution
    }

    async fn resolve_basic(&self, key: &str, secret: &str) -> Resolution {
        let client = match self.oauth.auth_client(key, secret).await {
            Ok(client) => client,
            Err(e) => {
                log_cause("client credentials rejected", &e);
                return Resolution::failed(AuthFailure::InvalidBasic);
            }
        };

        match self.store.find_account_by_oauth_client_id(&client.id).await {
            Ok(account) => Resolution {
                account: Some(account),
                user: None,
                failure: None,
            },
            Err(e) => {
                log_cause("no account for client", &e);
                Resolution::failed(AuthFailure::InvalidBasic)
            }
        }
    }
}

fn log_cause(context: &str, err: &IdentityError) {
    match err {
        IdentityError::Database(_) => tracing::warn!("Credential resolution: {}: {}", context, err),
        _ => tracing::debug!("Credential resolution: {}: {}", context, err),
    }
}

/// Resolution for this request, computed at most once and cached in extensions
pub async fn request_resolution(parts: &mut Parts, ctx: &AppContext) -> Arc<Resolution> {
    if let Some(resolution) = parts.extensions.get::<Arc<Resolution>>() {
        return resolution.clone();
    }

    let resolution = Arc::new(ctx.resolver.resolve(&parts.headers).await);
    if let Some(failure) = resolution.failure {
        tracing::debug!(?failure, "Credentials did not resolve");
    }
    parts.extensions.insert(resolution.clone());
    resolution
}

/// Account attached to the request (client or token)
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub Account);

#[async_trait]
impl FromRequestParts<AppContext> for AuthenticatedAccount {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        request_resolution(parts, state)
            .await
            .account
            .clone()
            .map(AuthenticatedAccount)
            .ok_or(IdentityError::ClientAuthenticationRequired)
    }
}

/// User attached to the request via a bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl FromRequestParts<AppContext> for AuthenticatedUser {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        request_resolution(parts, state)
            .await
            .user
            .clone()
            .map(AuthenticatedUser)
            .ok_or(IdentityError::UserAuthenticationRequired)
    }
}

/// Whatever identity the request carries; never rejects
#[derive(Debug, Clone)]
pub struct Identity {
    pub account: Option<Account>,
    pub user: Option<User>,
}

#[async_trait]
impl FromRequestParts<AppContext> for Identity {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let resolution = request_resolution(parts, state).await;
        Ok(Identity {
            account: resolution.account.clone(),
            user: resolution.user.clone(),
        })
    }
}
