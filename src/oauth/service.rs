/// OAuth token service
///
/// Owns clients, identities, scopes and the access/refresh token lifecycle.
/// Uses sqlx runtime queries so no DATABASE_URL is needed at build time.

use crate::{
    config::ServerConfig,
    db::{
        self,
        models::{AccessToken, OAuthClient, OAuthUser, RefreshToken},
    },
    error::{IdentityError, IdentityResult},
    oauth::password,
};
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

const INVALID_CLIENT: &str = "Invalid client ID or secret";
const INVALID_USER: &str = "Invalid username or password";

/// OAuth service
pub struct OAuthService {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl OAuthService {
    /// Create a new OAuth service
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    // ==================== Clients ====================

    /// Create a client inside the caller's transaction
    pub async fn create_client_tx(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        secret: &str,
        redirect_uri: &str,
    ) -> IdentityResult<OAuthClient> {
        let key = key.trim();
        if key.is_empty() || secret.is_empty() {
            return Err(IdentityError::ValidationFailed(
                "Client key and secret are required".to_string(),
            ));
        }

        let client = OAuthClient {
            id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            secret: password::hash(secret)?,
            redirect_uri: redirect_uri.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO oauth_clients (id, key, secret, redirect_uri, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&client.id)
        .bind(&client.key)
        .bind(&client.secret)
        .bind(&client.redirect_uri)
        .bind(client.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            IdentityError::on_unique_violation(e, IdentityError::Conflict("Client key taken".to_string()))
        })?;

        Ok(client)
    }

    pub async fn find_client_by_key(&self, key: &str) -> IdentityResult<OAuthClient> {
        sqlx::query_as::<_, OAuthClient>("SELECT * FROM oauth_clients WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("Client"))
    }

    pub async fn find_client_by_id(&self, id: &str) -> IdentityResult<OAuthClient> {
        sqlx::query_as::<_, OAuthClient>("SELECT * FROM oauth_clients WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("Client"))
    }

    /// Authenticate a client by key and secret
    ///
    /// Unknown key and wrong secret fail identically.
    pub async fn auth_client(&self, key: &str, secret: &str) -> IdentityResult<OAuthClient> {
        let client = match self.find_client_by_key(key).await {
            Ok(client) => client,
            Err(IdentityError::NotFound(_)) => {
                return Err(IdentityError::InvalidGrant(INVALID_CLIENT.to_string()))
            }
            Err(e) => return Err(e),
        };

        if !password::verify(secret, &client.secret) {
            return Err(IdentityError::InvalidGrant(INVALID_CLIENT.to_string()));
        }

        Ok(client)
    }

    // ==================== Identities ====================

    /// Whether an identity with this username exists
    pub async fn user_exists(&self, username: &str) -> IdentityResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oauth_users WHERE username = ?1")
            .bind(normalize_username(username))
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Create an identity inside the caller's transaction
    ///
    /// A `None` password creates a passwordless identity (invitations).
    pub async fn create_user_tx(
        &self,
        conn: &mut SqliteConnection,
        username: &str,
        password: Option<&str>,
    ) -> IdentityResult<OAuthUser> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(IdentityError::ValidationFailed("Username is required".to_string()));
        }

        let password_hash = match password {
            Some(plain) => {
                password::validate(plain)?;
                Some(password::hash(plain)?)
            }
            None => None,
        };

        let user = OAuthUser {
            id: Uuid::new_v4().to_string(),
            username,
            password: password_hash,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO oauth_users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password)
        .bind(user.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| IdentityError::on_unique_violation(e, IdentityError::UsernameTaken))?;

        Ok(user)
    }

    /// Replace an identity's password inside the caller's transaction
    pub async fn set_password_tx(
        &self,
        conn: &mut SqliteConnection,
        oauth_user_id: &str,
        new_password: &str,
    ) -> IdentityResult<()> {
        password::validate(new_password)?;
        let password_hash = password::hash(new_password)?;

        let result = sqlx::query("UPDATE oauth_users SET password = ?1 WHERE id = ?2")
            .bind(&password_hash)
            .bind(oauth_user_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound("User"));
        }

        Ok(())
    }

    pub async fn find_user_by_username(&self, username: &str) -> IdentityResult<OAuthUser> {
        sqlx::query_as::<_, OAuthUser>("SELECT * FROM oauth_users WHERE username = ?1")
            .bind(normalize_username(username))
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("User"))
    }

    pub async fn find_user_by_id(&self, id: &str) -> IdentityResult<OAuthUser> {
        sqlx::query_as::<_, OAuthUser>("SELECT * FROM oauth_users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("User"))
    }

    /// Authenticate an identity by username and password
    ///
    /// Unknown username, missing password and wrong password fail identically.
    pub async fn auth_user(&self, username: &str, plain: &str) -> IdentityResult<OAuthUser> {
        let user = match self.find_user_by_username(username).await {
            Ok(user) => user,
            Err(IdentityError::NotFound(_)) => {
                return Err(IdentityError::InvalidGrant(INVALID_USER.to_string()))
            }
            Err(e) => return Err(e),
        };

        match &user.password {
            Some(stored) if password::verify(plain, stored) => Ok(user),
            _ => Err(IdentityError::InvalidGrant(INVALID_USER.to_string())),
        }
    }

    // ==================== Scopes ====================

    /// Resolve a requested scope string
    ///
    /// Empty requests get the default scopes; otherwise every requested scope must exist.
    pub async fn get_scope(&self, requested: &str) -> IdentityResult<String> {
        let requested: Vec<&str> = requested.split_whitespace().collect();

        if requested.is_empty() {
            let defaults: Vec<String> = sqlx::query_scalar(
                "SELECT scope FROM oauth_scopes WHERE is_default = 1 ORDER BY scope",
            )
            .fetch_all(&self.db)
            .await?;
            return Ok(defaults.join(" "));
        }

        let known: Vec<String> = sqlx::query_scalar("SELECT scope FROM oauth_scopes")
            .fetch_all(&self.db)
            .await?;

        if requested.iter().all(|s| known.iter().any(|k| k == s)) {
            let mut scopes: Vec<&str> = requested;
            scopes.sort_unstable();
            scopes.dedup();
            Ok(scopes.join(" "))
        } else {
            Err(IdentityError::InvalidScope)
        }
    }

    // ==================== Tokens ====================

    /// Issue an access token and get-or-create the refresh token for a user login
    pub async fn login(
        &self,
        client: &OAuthClient,
        user: &OAuthUser,
        scope: &str,
    ) -> IdentityResult<(AccessToken, RefreshToken)> {
        let access_token = self.grant_access_token(client, Some(user), scope).await?;
        let refresh_token = self.get_or_create_refresh_token(client, Some(user), scope).await?;

        tracing::debug!(client = %client.key, user = %user.id, "Issued token pair");

        Ok((access_token, refresh_token))
    }

    /// Issue an access token; `user` is `None` for client-credentials grants
    pub async fn grant_access_token(
        &self,
        client: &OAuthClient,
        user: Option<&OAuthUser>,
        scope: &str,
    ) -> IdentityResult<AccessToken> {
        let user_id = user.map(|u| u.id.clone());
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.oauth.access_token_lifetime);
        let id = Uuid::new_v4().to_string();
        let token = self.sign_access_token(&id, &client.id, user_id.as_deref(), scope, expires_at.timestamp())?;

        let mut tx = db::begin_write(&self.db).await?;

        // Expired tokens for the same pair are dead weight
        sqlx::query(
            "DELETE FROM oauth_access_tokens
             WHERE client_id = ?1 AND user_id IS ?2 AND expires_at <= ?3",
        )
        .bind(&client.id)
        .bind(&user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO oauth_access_tokens (id, client_id, user_id, token, scope, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(&client.id)
        .bind(&user_id)
        .bind(&token)
        .bind(scope)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AccessToken {
            id,
            client_id: Some(client.id.clone()),
            user_id,
            token,
            scope: scope.to_string(),
            expires_at,
            created_at: now,
        })
    }

    /// Reuse the pair's unexpired refresh token or create a fresh one
    pub async fn get_or_create_refresh_token(
        &self,
        client: &OAuthClient,
        user: Option<&OAuthUser>,
        scope: &str,
    ) -> IdentityResult<RefreshToken> {
        let user_id = user.map(|u| u.id.clone());
        let now = Utc::now();

        let existing = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM oauth_refresh_tokens WHERE client_id = ?1 AND user_id IS ?2",
        )
        .bind(&client.id)
        .bind(&user_id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(token) = existing {
            if token.expires_at > now {
                return Ok(token);
            }

            sqlx::query("DELETE FROM oauth_refresh_tokens WHERE id = ?1")
                .bind(&token.id)
                .execute(&self.db)
                .await?;
        }

        let refresh_token = RefreshToken {
            id: Uuid::new_v4().to_string(),
            client_id: client.id.clone(),
            user_id,
            token: generate_opaque_token(),
            scope: scope.to_string(),
            expires_at: now + Duration::seconds(self.config.oauth.refresh_token_lifetime),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO oauth_refresh_tokens (id, client_id, user_id, token, scope, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&refresh_token.id)
        .bind(&refresh_token.client_id)
        .bind(&refresh_token.user_id)
        .bind(&refresh_token.token)
        .bind(&refresh_token.scope)
        .bind(refresh_token.expires_at)
        .bind(refresh_token.created_at)
        .execute(&self.db)
        .await?;

        Ok(refresh_token)
    }

    /// Validate a bearer access token
    ///
    /// Also slides the expiry of the matching refresh token forward.
    pub async fn authenticate(&self, token: &str) -> IdentityResult<AccessToken> {
        let access_token = self.find_access_token(token).await?;

        let now = Utc::now();
        if access_token.expires_at <= now {
            return Err(IdentityError::InvalidGrant("Access token expired".to_string()));
        }

        sqlx::query(
            "UPDATE oauth_refresh_tokens SET expires_at = ?1 WHERE client_id IS ?2 AND user_id IS ?3",
        )
        .bind(now + Duration::seconds(self.config.oauth.refresh_token_lifetime))
        .bind(&access_token.client_id)
        .bind(&access_token.user_id)
        .execute(&self.db)
        .await?;

        Ok(access_token)
    }

    /// Look up an access token without any expiry check
    pub async fn find_access_token(&self, token: &str) -> IdentityResult<AccessToken> {
        sqlx::query_as::<_, AccessToken>("SELECT * FROM oauth_access_tokens WHERE token = ?1")
            .bind(token)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| IdentityError::InvalidGrant("Access token not found".to_string()))
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The requested scope may narrow, never widen, the original grant.
    pub async fn refresh(
        &self,
        client: &OAuthClient,
        token: &str,
        requested_scope: &str,
    ) -> IdentityResult<(AccessToken, RefreshToken)> {
        let refresh_token = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM oauth_refresh_tokens WHERE token = ?1 AND client_id = ?2",
        )
        .bind(token)
        .bind(&client.id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| IdentityError::InvalidGrant("Refresh token not found".to_string()))?;

        if refresh_token.expires_at <= Utc::now() {
            return Err(IdentityError::InvalidGrant("Refresh token expired".to_string()));
        }

        let scope = if requested_scope.trim().is_empty() {
            refresh_token.scope.clone()
        } else {
            let granted: Vec<&str> = refresh_token.scope.split_whitespace().collect();
            if !requested_scope
                .split_whitespace()
                .all(|s| granted.contains(&s))
            {
                return Err(IdentityError::InvalidScope);
            }
            self.get_scope(requested_scope).await?
        };

        let user = match &refresh_token.user_id {
            Some(user_id) => Some(self.find_user_by_id(user_id).await?),
            None => None,
        };

        let access_token = self.grant_access_token(client, user.as_ref(), &scope).await?;

        Ok((access_token, refresh_token))
    }

    /// Delete expired access and refresh tokens
    ///
    /// Returns (access_tokens_deleted, refresh_tokens_deleted)
    pub async fn cleanup_expired_tokens(&self) -> IdentityResult<(u64, u64)> {
        let now = Utc::now();

        let access_result = sqlx::query("DELETE FROM oauth_access_tokens WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await?;

        let refresh_result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await?;

        let access_tokens_deleted = access_result.rows_affected();
        let refresh_tokens_deleted = refresh_result.rows_affected();

        if access_tokens_deleted > 0 || refresh_tokens_deleted > 0 {
            tracing::info!(
                access_tokens_deleted,
                refresh_tokens_deleted,
                "Cleaned up expired tokens"
            );
        } else {
            tracing::debug!("Token cleanup: no expired tokens found");
        }

        Ok((access_tokens_deleted, refresh_tokens_deleted))
    }

    /// Sign an access token JWT
    fn sign_access_token(
        &self,
        id: &str,
        client_id: &str,
        user_id: Option<&str>,
        scope: &str,
        exp: i64,
    ) -> IdentityResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Serialize, Deserialize)]
        struct Claims<'a> {
            sub: &'a str,
            cid: &'a str,
            scope: &'a str,
            jti: &'a str,
            iat: i64,
            exp: i64,
        }

        let claims = Claims {
            sub: user_id.unwrap_or(client_id),
            cid: client_id,
            scope,
            jti: id,
            iat: Utc::now().timestamp(),
            exp,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.oauth.jwt_secret.as_bytes()),
        )
        .map_err(|e| IdentityError::Internal(format!("Failed to sign access token: {}", e)))
    }
}

/// Usernames are emails, compared case-insensitively
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

fn generate_opaque_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}
