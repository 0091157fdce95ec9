/// Row models for the identity database
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// OAuth client credential pair backing an account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthClient {
    pub id: String,
    pub key: String,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub secret: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth identity holding the login and password
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthUser {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string, absent for invited users who have not set one yet
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: String,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub token: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub token: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Tenant
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub oauth_client_id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

/// Tenant member; `email` is the linked OAuth identity's username
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub account_id: String,
    pub oauth_user_id: String,
    pub role_id: String,
    pub email: String,
    pub facebook_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_superuser(&self) -> bool {
        self.role_id == crate::account::roles::SUPERUSER
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: String,
    /// Secret emailed to the recipient
    #[serde(skip_serializing)]
    pub reference: String,
    pub user_id: String,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    /// Secret emailed to the recipient
    #[serde(skip_serializing)]
    pub reference: String,
    pub invited_user_id: String,
    pub invited_by_user_id: String,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PasswordReset {
    pub id: String,
    /// Secret emailed to the recipient
    #[serde(skip_serializing)]
    pub reference: String,
    pub user_id: String,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
