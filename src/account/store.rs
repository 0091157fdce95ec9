/// Read side of the credential store
///
/// Lookups for accounts, users and the emailed reference tokens. The helpers
/// are generic over the executor so workflows can reuse them inside a transaction.

use crate::{
    db::models::{Account, Confirmation, Invitation, PasswordReset, User},
    error::{IdentityError, IdentityResult},
};
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};

const USER_SELECT: &str = "SELECT users.*, oauth_users.username AS email
     FROM users JOIN oauth_users ON oauth_users.id = users.oauth_user_id";

pub(crate) async fn user_by_id<'e, E>(executor: E, id: &str) -> IdentityResult<User>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(&format!("{} WHERE users.id = ?1", USER_SELECT))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(IdentityError::NotFound("User"))
}

/// Credential store queries
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ==================== Accounts ====================

    pub async fn find_account_by_id(&self, id: &str) -> IdentityResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("Account"))
    }

    pub async fn find_account_by_name(&self, name: &str) -> IdentityResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("Account"))
    }

    /// Account owning an OAuth client
    pub async fn find_account_by_oauth_client_id(
        &self,
        oauth_client_id: &str,
    ) -> IdentityResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE oauth_client_id = ?1")
            .bind(oauth_client_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("Account"))
    }

    // ==================== Users ====================

    pub async fn find_user_by_id(&self, id: &str) -> IdentityResult<User> {
        user_by_id(&self.db, id).await
    }

    /// User bound to an OAuth identity
    pub async fn find_user_by_oauth_user_id(&self, oauth_user_id: &str) -> IdentityResult<User> {
        sqlx::query_as::<_, User>(&format!("{} WHERE users.oauth_user_id = ?1", USER_SELECT))
            .bind(oauth_user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("User"))
    }

    pub async fn find_user_by_email(&self, email: &str) -> IdentityResult<User> {
        sqlx::query_as::<_, User>(&format!("{} WHERE oauth_users.username = ?1", USER_SELECT))
            .bind(crate::oauth::normalize_username(email))
            .fetch_optional(&self.db)
            .await?
            .ok_or(IdentityError::NotFound("User"))
    }

    /// One page of an account's users, newest first, plus the total count
    pub async fn list_users(
        &self,
        account_id: &str,
        offset: i64,
        limit: i64,
    ) -> IdentityResult<(Vec<User>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(&self.db)
            .await?;

        let users = sqlx::query_as::<_, User>(&format!(
            "{} WHERE users.account_id = ?1 ORDER BY users.created_at DESC, users.id LIMIT ?2 OFFSET ?3",
            USER_SELECT
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok((users, total))
    }

    // ==================== Reference tokens ====================
    //
    // Unknown, consumed and expired references are indistinguishable.

    pub async fn find_confirmation_by_reference(
        &self,
        reference: &str,
    ) -> IdentityResult<Confirmation> {
        let confirmation = sqlx::query_as::<_, Confirmation>(
            "SELECT * FROM confirmations WHERE reference = ?1 AND deleted_at IS NULL",
        )
        .bind(reference)
        .fetch_optional(&self.db)
        .await?;

        match confirmation {
            Some(c) if c.expires_at > Utc::now() => Ok(c),
            _ => Err(IdentityError::NotFound("Confirmation")),
        }
    }

    pub async fn find_invitation_by_reference(
        &self,
        reference: &str,
    ) -> IdentityResult<Invitation> {
        let invitation = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE reference = ?1 AND deleted_at IS NULL",
        )
        .bind(reference)
        .fetch_optional(&self.db)
        .await?;

        match invitation {
            Some(i) if i.expires_at > Utc::now() => Ok(i),
            _ => Err(IdentityError::NotFound("Invitation")),
        }
    }

    pub async fn find_password_reset_by_reference(
        &self,
        reference: &str,
    ) -> IdentityResult<PasswordReset> {
        let reset = sqlx::query_as::<_, PasswordReset>(
            "SELECT * FROM password_resets WHERE reference = ?1 AND deleted_at IS NULL",
        )
        .bind(reference)
        .fetch_optional(&self.db)
        .await?;

        match reset {
            Some(r) if r.expires_at > Utc::now() => Ok(r),
            _ => Err(IdentityError::NotFound("Password reset")),
        }
    }
}
