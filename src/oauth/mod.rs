/// OAuth2 subsystem
///
/// Clients, password identities, scopes and the access/refresh token lifecycle
/// that the credential resolver and the account workflows build on.

pub mod password;
mod service;

pub use service::{normalize_username, OAuthService};

use serde::{Deserialize, Serialize};

/// Token endpoint request (form encoded)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub user_id: Option<String>,
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn new(
        access_token: &crate::db::models::AccessToken,
        refresh_token: Option<&crate::db::models::RefreshToken>,
        lifetime: i64,
    ) -> Self {
        Self {
            user_id: access_token.user_id.clone(),
            access_token: access_token.token.clone(),
            expires_in: lifetime,
            token_type: "Bearer".to_string(),
            scope: access_token.scope.clone(),
            refresh_token: refresh_token.map(|t| t.token.clone()),
        }
    }
}

/// Introspection request (form encoded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

/// Introspection response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}
