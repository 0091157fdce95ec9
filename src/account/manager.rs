/// Account workflows
///
/// Every operation runs in a single transaction spanning the OAuth identity writes
/// and the domain rows; dropping an uncommitted transaction rolls everything back.
/// Emails are scheduled only after commit.

use crate::{
    account::{
        roles,
        store::user_by_id,
        validate_request, InvitationRequest, UpdateUserRequest, UserRequest,
    },
    config::ServerConfig,
    db::{
        self,
        models::{Account, Confirmation, Invitation, OAuthUser, PasswordReset, User},
    },
    error::{IdentityError, IdentityResult},
    metrics,
    notifier::{Notification, NotificationKind, Notifier},
    oauth::OAuthService,
};
use chrono::{Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Account workflow engine
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    oauth: Arc<OAuthService>,
    notifier: Notifier,
}

/// Names and flags for a user row about to be inserted
struct NewUser<'a> {
    role_id: &'a str,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    confirmed: bool,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        oauth: Arc<OAuthService>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            config,
            oauth,
            notifier,
        }
    }

    /// Create a tenant together with its OAuth client
    pub async fn create_account(
        &self,
        name: &str,
        description: &str,
        key: &str,
        secret: &str,
        redirect_uri: &str,
    ) -> IdentityResult<Account> {
        let result: IdentityResult<Account> = async {
            if name.trim().is_empty() {
                return Err(IdentityError::ValidationFailed(
                    "Account name is required".to_string(),
                ));
            }

            let mut tx = db::begin_write(&self.db).await?;

            let client = self
                .oauth
                .create_client_tx(&mut tx, key, secret, redirect_uri)
                .await?;

            let account = Account {
                id: Uuid::new_v4().to_string(),
                oauth_client_id: client.id,
                name: name.trim().to_string(),
                description: description.to_string(),
                created_at: Utc::now(),
            };

            sqlx::query(
                "INSERT INTO accounts (id, oauth_client_id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&account.id)
            .bind(&account.oauth_client_id)
            .bind(&account.name)
            .bind(&account.description)
            .bind(account.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                IdentityError::on_unique_violation(
                    e,
                    IdentityError::Conflict("Account name taken".to_string()),
                )
            })?;

            tx.commit().await?;

            tracing::info!(account = %account.name, "Account created");
            Ok(account)
        }
        .await;

        metrics::record_workflow("create_account", result.is_ok());
        result
    }

    /// Self-registration
    ///
    /// The confirmation row is written in the same transaction as the user.
    pub async fn create_user(
        &self,
        account: &Account,
        request: &UserRequest,
    ) -> IdentityResult<User> {
        let result: IdentityResult<(User, Confirmation)> = async {
            let role_id = match request.role.as_deref().map(str::trim) {
                None | Some("") => roles::USER,
                Some(role) => role,
            };

            if !roles::is_public(role_id) {
                return Err(IdentityError::SuperuserOnlyManually);
            }

            validate_request(request)?;

            let mut tx = db::begin_write(&self.db).await?;

            roles::find_role(&mut *tx, role_id).await?;

            let oauth_user = self
                .oauth
                .create_user_tx(&mut tx, &request.email, Some(&request.password))
                .await?;

            let user = self
                .insert_user(
                    &mut tx,
                    account,
                    &oauth_user,
                    NewUser {
                        role_id,
                        first_name: request.first_name.as_deref(),
                        last_name: request.last_name.as_deref(),
                        confirmed: false,
                    },
                )
                .await?;

            let confirmation = self.insert_confirmation(&mut tx, &user).await?;

            tx.commit().await?;

            Ok((user, confirmation))
        }
        .await;

        metrics::record_workflow("create_user", result.is_ok());
        let (user, confirmation) = result?;

        tracing::info!(user = %user.id, account = %account.id, "User created");

        self.notifier.schedule(Notification {
            kind: NotificationKind::Confirmation,
            entity_id: confirmation.id,
            reference: confirmation.reference,
            to: user.email.clone(),
            first_name: user.first_name.clone(),
            invited_by: None,
        });

        Ok(user)
    }

    /// Create a superuser; trusted callers only
    ///
    /// Superusers are created confirmed and receive no confirmation email.
    pub async fn create_superuser(
        &self,
        account: &Account,
        email: &str,
        password: &str,
    ) -> IdentityResult<User> {
        let result: IdentityResult<User> = async {
            let mut tx = db::begin_write(&self.db).await?;

            roles::find_role(&mut *tx, roles::SUPERUSER).await?;

            let oauth_user = self
                .oauth
                .create_user_tx(&mut tx, email, Some(password))
                .await?;

            let user = self
                .insert_user(
                    &mut tx,
                    account,
                    &oauth_user,
                    NewUser {
                        role_id: roles::SUPERUSER,
                        first_name: None,
                        last_name: None,
                        confirmed: true,
                    },
                )
                .await?;

            tx.commit().await?;
            Ok(user)
        }
        .await;

        metrics::record_workflow("create_superuser", result.is_ok());
        let user = result?;

        tracing::info!(user = %user.id, account = %account.id, "Superuser created");
        Ok(user)
    }

    /// Invite a new user into the inviter's account
    pub async fn invite_user(
        &self,
        invited_by: &User,
        request: &InvitationRequest,
    ) -> IdentityResult<Invitation> {
        let result: IdentityResult<Invitation> = async {
            let role_id = match request.role.as_deref().map(str::trim) {
                None | Some("") => roles::USER,
                Some(role) => role,
            };

            if !roles::is_public(role_id) {
                return Err(IdentityError::SuperuserOnlyManually);
            }

            validate_request(request)?;

            // Fast path only; the unique index on username is the real guard
            if self.oauth.user_exists(&request.email).await? {
                return Err(IdentityError::UsernameTaken);
            }

            let mut tx = db::begin_write(&self.db).await?;

            roles::find_role(&mut *tx, role_id).await?;

            let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1")
                .bind(&invited_by.account_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(IdentityError::NotFound("Account"))?;

            let oauth_user = self
                .oauth
                .create_user_tx(&mut tx, &request.email, None)
                .await?;

            let invited_user = self
                .insert_user(
                    &mut tx,
                    &account,
                    &oauth_user,
                    NewUser {
                        role_id,
                        first_name: request.first_name.as_deref(),
                        last_name: request.last_name.as_deref(),
                        confirmed: false,
                    },
                )
                .await?;

            let now = Utc::now();
            let invitation = Invitation {
                id: Uuid::new_v4().to_string(),
                reference: Uuid::new_v4().to_string(),
                invited_user_id: invited_user.id.clone(),
                invited_by_user_id: invited_by.id.clone(),
                email_sent: false,
                email_sent_at: None,
                expires_at: now + Duration::seconds(self.config.lifetimes.invitation),
                created_at: now,
                deleted_at: None,
            };

            sqlx::query(
                "INSERT INTO invitations (id, reference, invited_user_id, invited_by_user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&invitation.id)
            .bind(&invitation.reference)
            .bind(&invitation.invited_user_id)
            .bind(&invitation.invited_by_user_id)
            .bind(invitation.expires_at)
            .bind(invitation.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(invitation)
        }
        .await;

        metrics::record_workflow("invite_user", result.is_ok());
        let invitation = result?;

        tracing::info!(invitation = %invitation.id, invited_by = %invited_by.id, "User invited");

        self.notifier.schedule(Notification {
            kind: NotificationKind::Invitation,
            entity_id: invitation.id.clone(),
            reference: invitation.reference.clone(),
            to: crate::oauth::normalize_username(&request.email),
            first_name: request.first_name.clone(),
            invited_by: Some(display_name(invited_by)),
        });

        Ok(invitation)
    }

    /// Accept an invitation by choosing a password
    ///
    /// Receiving the invitation proves the address, so the user is confirmed too.
    pub async fn confirm_invitation(
        &self,
        invitation: &Invitation,
        new_password: &str,
    ) -> IdentityResult<User> {
        let result: IdentityResult<User> = async {
            let mut tx = db::begin_write(&self.db).await?;

            let user = user_by_id(&mut *tx, &invitation.invited_user_id).await?;

            self.oauth
                .set_password_tx(&mut tx, &user.oauth_user_id, new_password)
                .await?;

            Self::consume(&mut tx, "invitations", &invitation.id, "Invitation").await?;
            Self::mark_confirmed(&mut tx, &user.id).await?;

            let user = user_by_id(&mut *tx, &user.id).await?;
            tx.commit().await?;
            Ok(user)
        }
        .await;

        metrics::record_workflow("confirm_invitation", result.is_ok());
        result
    }

    /// Consume a confirmation and mark its user confirmed
    pub async fn confirm_user(&self, confirmation: &Confirmation) -> IdentityResult<User> {
        let result: IdentityResult<User> = async {
            let mut tx = db::begin_write(&self.db).await?;

            Self::consume(&mut tx, "confirmations", &confirmation.id, "Confirmation").await?;
            Self::mark_confirmed(&mut tx, &confirmation.user_id).await?;

            let user = user_by_id(&mut *tx, &confirmation.user_id).await?;
            tx.commit().await?;
            Ok(user)
        }
        .await;

        metrics::record_workflow("confirm_user", result.is_ok());
        result
    }

    /// Start a password reset, retiring any earlier active reset for the user
    pub async fn create_password_reset(&self, user: &User) -> IdentityResult<PasswordReset> {
        let result: IdentityResult<PasswordReset> = async {
            let now = Utc::now();
            let mut tx = db::begin_write(&self.db).await?;

            sqlx::query(
                "UPDATE password_resets SET deleted_at = ?1 WHERE user_id = ?2 AND deleted_at IS NULL",
            )
            .bind(now)
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;

            let reset = PasswordReset {
                id: Uuid::new_v4().to_string(),
                reference: Uuid::new_v4().to_string(),
                user_id: user.id.clone(),
                email_sent: false,
                email_sent_at: None,
                expires_at: now + Duration::seconds(self.config.lifetimes.password_reset),
                created_at: now,
                deleted_at: None,
            };

            sqlx::query(
                "INSERT INTO password_resets (id, reference, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&reset.id)
            .bind(&reset.reference)
            .bind(&reset.user_id)
            .bind(reset.expires_at)
            .bind(reset.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(reset)
        }
        .await;

        metrics::record_workflow("create_password_reset", result.is_ok());
        let reset = result?;

        self.notifier.schedule(Notification {
            kind: NotificationKind::PasswordReset,
            entity_id: reset.id.clone(),
            reference: reset.reference.clone(),
            to: user.email.clone(),
            first_name: user.first_name.clone(),
            invited_by: None,
        });

        Ok(reset)
    }

    /// Complete a password reset
    ///
    /// Also revokes every token issued to the user.
    pub async fn reset_password(
        &self,
        reset: &PasswordReset,
        new_password: &str,
    ) -> IdentityResult<()> {
        let result: IdentityResult<()> = async {
            let mut tx = db::begin_write(&self.db).await?;

            let user = user_by_id(&mut *tx, &reset.user_id).await?;

            self.oauth
                .set_password_tx(&mut tx, &user.oauth_user_id, new_password)
                .await?;

            Self::consume(&mut tx, "password_resets", &reset.id, "Password reset").await?;

            sqlx::query("DELETE FROM oauth_access_tokens WHERE user_id = ?1")
                .bind(&user.oauth_user_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM oauth_refresh_tokens WHERE user_id = ?1")
                .bind(&user.oauth_user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!(user = %user.id, "Password reset completed");
            Ok(())
        }
        .await;

        metrics::record_workflow("reset_password", result.is_ok());
        result
    }

    /// Update profile fields
    pub async fn update_user(
        &self,
        user: &User,
        request: &UpdateUserRequest,
    ) -> IdentityResult<User> {
        validate_request(request)?;

        sqlx::query(
            "UPDATE users SET first_name = ?1, last_name = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(request.first_name.as_deref().or(user.first_name.as_deref()))
        .bind(request.last_name.as_deref().or(user.last_name.as_deref()))
        .bind(Utc::now())
        .bind(&user.id)
        .execute(&self.db)
        .await?;

        user_by_id(&self.db, &user.id).await
    }

    async fn insert_user(
        &self,
        conn: &mut SqliteConnection,
        account: &Account,
        oauth_user: &OAuthUser,
        new_user: NewUser<'_>,
    ) -> IdentityResult<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            oauth_user_id: oauth_user.id.clone(),
            role_id: new_user.role_id.to_string(),
            email: oauth_user.username.clone(),
            facebook_id: None,
            first_name: new_user.first_name.map(str::to_string),
            last_name: new_user.last_name.map(str::to_string),
            confirmed: new_user.confirmed,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO users (id, account_id, oauth_user_id, role_id, first_name, last_name, confirmed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&user.id)
        .bind(&user.account_id)
        .bind(&user.oauth_user_id)
        .bind(&user.role_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.confirmed)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(user)
    }

    async fn insert_confirmation(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
    ) -> IdentityResult<Confirmation> {
        let now = Utc::now();
        let confirmation = Confirmation {
            id: Uuid::new_v4().to_string(),
            reference: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            email_sent: false,
            email_sent_at: None,
            expires_at: now + Duration::seconds(self.config.lifetimes.confirmation),
            created_at: now,
            deleted_at: None,
        };

        sqlx::query(
            "INSERT INTO confirmations (id, reference, user_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&confirmation.id)
        .bind(&confirmation.reference)
        .bind(&confirmation.user_id)
        .bind(confirmation.expires_at)
        .bind(confirmation.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(confirmation)
    }

    /// Soft-delete a reference row exactly once
    async fn consume(
        conn: &mut SqliteConnection,
        table: &'static str,
        id: &str,
        entity: &'static str,
    ) -> IdentityResult<()> {
        let query = format!(
            "UPDATE {} SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            table
        );

        let result = sqlx::query(&query)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;

        // Lost a race with a concurrent consumer
        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(entity));
        }

        Ok(())
    }

    /// Column-only update of the confirmed flag
    async fn mark_confirmed(conn: &mut SqliteConnection, user_id: &str) -> IdentityResult<()> {
        sqlx::query("UPDATE users SET confirmed = 1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

fn display_name(user: &User) -> String {
    match (&user.first_name, &user.last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.clone(),
        _ => user.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountStore, InvitationRequest},
        db,
        mailer::{testing::RecordingSender, EmailFactory},
        notifier::{DeliveryOutcome, DeliveryReport},
    };
    use std::path::PathBuf;
    use tokio::sync::broadcast;

    struct Harness {
        _dir: tempfile::TempDir,
        db: SqlitePool,
        manager: AccountManager,
        store: AccountStore,
        oauth: Arc<OAuthService>,
        sender: Arc<RecordingSender>,
        reports: broadcast::Receiver<DeliveryReport>,
    }

    async fn setup() -> Harness {
        let (dir, pool) = db::test_pool().await;
        let config = Arc::new(ServerConfig::for_tests(PathBuf::from(":memory:")));
        let oauth = Arc::new(OAuthService::new(pool.clone(), config.clone()));
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(
            pool.clone(),
            sender.clone(),
            EmailFactory::new(&config.service.public_url),
        );
        let reports = notifier.subscribe();
        let manager = AccountManager::new(pool.clone(), config, oauth.clone(), notifier);

        Harness {
            _dir: dir,
            db: pool.clone(),
            manager,
            store: AccountStore::new(pool),
            oauth,
            sender,
            reports,
        }
    }

    async fn create_test_account(h: &Harness) -> Account {
        h.manager
            .create_account("Test Account", "", "test_client", "test_secret", "https://example.com")
            .await
            .unwrap()
    }

    fn user_request(email: &str) -> UserRequest {
        UserRequest {
            email: email.to_string(),
            password: "test_password".to_string(),
            role: None,
            first_name: Some("John".to_string()),
            last_name: None,
        }
    }

    async fn count(db: &SqlitePool, query: &str) -> i64 {
        sqlx::query_scalar(query).fetch_one(db).await.unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_client_key_leaves_accounts_unchanged() {
        let h = setup().await;
        create_test_account(&h).await;

        let err = h
            .manager
            .create_account("Other Account", "", "test_client", "secret", "https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(_)));
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM accounts").await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_account_name_rolls_back_client() {
        let h = setup().await;
        create_test_account(&h).await;

        let err = h
            .manager
            .create_account("Test Account", "", "another_client", "secret", "https://example.com")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Account name taken");
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM oauth_clients").await, 1);
    }

    #[tokio::test]
    async fn test_create_user_rejects_superuser_role() {
        let h = setup().await;
        let account = create_test_account(&h).await;

        let mut request = user_request("john@example.com");
        request.role = Some("superuser".to_string());

        let err = h.manager.create_user(&account, &request).await.unwrap_err();
        assert!(matches!(err, IdentityError::SuperuserOnlyManually));
        assert!(!h.oauth.user_exists("john@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_user_unknown_role() {
        let h = setup().await;
        let account = create_test_account(&h).await;

        let mut request = user_request("john@example.com");
        request.role = Some("moderator".to_string());

        let err = h.manager.create_user(&account, &request).await.unwrap_err();
        assert!(matches!(err, IdentityError::RoleNotFound));
    }

    #[tokio::test]
    async fn test_create_user_failure_rolls_back_identity() {
        let h = setup().await;
        let account = create_test_account(&h).await;

        let mut request = user_request("john@example.com");
        request.password = "short".to_string();

        let err = h.manager.create_user(&account, &request).await.unwrap_err();
        assert!(matches!(err, IdentityError::ValidationFailed(_)));
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM oauth_users").await, 0);
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM users").await, 0);
    }

    #[tokio::test]
    async fn test_create_user_duplicate_email() {
        let h = setup().await;
        let account = create_test_account(&h).await;

        h.manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();
        let err = h
            .manager
            .create_user(&account, &user_request("JOHN@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UsernameTaken));
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM users").await, 1);
    }

    #[tokio::test]
    async fn test_create_user_confirm_round_trip() {
        let mut h = setup().await;
        let account = create_test_account(&h).await;

        let user = h
            .manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();
        assert_eq!(user.role_id, roles::USER);
        assert!(!user.confirmed);

        // Exactly one confirmation email, flagged as sent
        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Sent);
        assert_eq!(h.sender.sent().len(), 1);
        assert_eq!(h.sender.sent()[0].to, "john@example.com");

        let reference: String =
            sqlx::query_scalar("SELECT reference FROM confirmations WHERE user_id = ?1")
                .bind(&user.id)
                .fetch_one(&h.db)
                .await
                .unwrap();

        let confirmation = h.store.find_confirmation_by_reference(&reference).await.unwrap();
        assert!(confirmation.email_sent);

        let confirmed = h.manager.confirm_user(&confirmation).await.unwrap();
        assert!(confirmed.confirmed);

        let err = h
            .store
            .find_confirmation_by_reference(&reference)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Confirmation not found");

        // Replaying the consumed row fails too
        assert!(matches!(
            h.manager.confirm_user(&confirmation).await,
            Err(IdentityError::NotFound("Confirmation"))
        ));
    }

    #[tokio::test]
    async fn test_expired_references_behave_as_unknown() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let user = h
            .manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();
        let reset = h.manager.create_password_reset(&user).await.unwrap();
        let inviter = h
            .manager
            .create_superuser(&account, "admin@example.com", "admin_password")
            .await
            .unwrap();
        let invitation = h
            .manager
            .invite_user(
                &inviter,
                &InvitationRequest {
                    email: "jane@example.com".to_string(),
                    role: None,
                    first_name: None,
                    last_name: None,
                },
            )
            .await
            .unwrap();

        let past = Utc::now() - Duration::seconds(1);
        sqlx::query("UPDATE invitations SET expires_at = ?1")
            .bind(past)
            .execute(&h.db)
            .await
            .unwrap();
        sqlx::query("UPDATE confirmations SET expires_at = ?1")
            .bind(past)
            .execute(&h.db)
            .await
            .unwrap();
        sqlx::query("UPDATE password_resets SET expires_at = ?1")
            .bind(past)
            .execute(&h.db)
            .await
            .unwrap();

        let reference: String = sqlx::query_scalar("SELECT reference FROM confirmations")
            .fetch_one(&h.db)
            .await
            .unwrap();

        let expired = h.store.find_confirmation_by_reference(&reference).await.unwrap_err();
        let unknown = h.store.find_confirmation_by_reference("bogus").await.unwrap_err();
        assert_eq!(expired.to_string(), unknown.to_string());

        let expired = h
            .store
            .find_password_reset_by_reference(&reset.reference)
            .await
            .unwrap_err();
        assert_eq!(expired.to_string(), "Password reset not found");

        let expired = h
            .store
            .find_invitation_by_reference(&invitation.reference)
            .await
            .unwrap_err();
        let unknown = h.store.find_invitation_by_reference("bogus").await.unwrap_err();
        assert_eq!(expired.to_string(), "Invitation not found");
        assert_eq!(expired.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_password_reset_keeps_one_active_row() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let user = h
            .manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();

        let first = h.manager.create_password_reset(&user).await.unwrap();
        let second = h.manager.create_password_reset(&user).await.unwrap();

        let active = count(
            &h.db,
            "SELECT COUNT(*) FROM password_resets WHERE deleted_at IS NULL",
        )
        .await;
        assert_eq!(active, 1);
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM password_resets").await, 2);

        assert!(h.store.find_password_reset_by_reference(&first.reference).await.is_err());
        assert!(h.store.find_password_reset_by_reference(&second.reference).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_password() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let user = h
            .manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();

        let client = h.oauth.find_client_by_key("test_client").await.unwrap();
        let oauth_user = h.oauth.find_user_by_id(&user.oauth_user_id).await.unwrap();
        let (access, _) = h.oauth.login(&client, &oauth_user, "read").await.unwrap();

        let reset = h.manager.create_password_reset(&user).await.unwrap();
        h.manager.reset_password(&reset, "new_password").await.unwrap();

        assert!(h.oauth.auth_user("john@example.com", "new_password").await.is_ok());
        assert!(h.oauth.auth_user("john@example.com", "test_password").await.is_err());
        assert!(h.oauth.authenticate(&access.token).await.is_err());

        // Single use
        assert!(matches!(
            h.manager.reset_password(&reset, "another_password").await,
            Err(IdentityError::NotFound("Password reset"))
        ));
    }

    #[tokio::test]
    async fn test_invite_existing_username_writes_nothing() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let inviter = h
            .manager
            .create_superuser(&account, "admin@example.com", "admin_password")
            .await
            .unwrap();

        let request = InvitationRequest {
            email: "admin@example.com".to_string(),
            role: None,
            first_name: None,
            last_name: None,
        };

        let err = h.manager.invite_user(&inviter, &request).await.unwrap_err();
        assert!(matches!(err, IdentityError::UsernameTaken));
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM invitations").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_invites_for_one_email() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let inviter = Arc::new(
            h.manager
                .create_superuser(&account, "admin@example.com", "admin_password")
                .await
                .unwrap(),
        );
        let db = h.db.clone();
        let manager = Arc::new(h.manager);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let inviter = inviter.clone();
                tokio::spawn(async move {
                    let request = InvitationRequest {
                        email: "race@example.com".to_string(),
                        role: None,
                        first_name: None,
                        last_name: None,
                    };
                    manager.invite_user(&inviter, &request).await
                })
            })
            .collect();

        let mut invited = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => invited += 1,
                Err(IdentityError::UsernameTaken) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(invited, 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM invitations").await, 1);
    }

    #[tokio::test]
    async fn test_invite_and_confirm_invitation() {
        let mut h = setup().await;
        let account = create_test_account(&h).await;
        let inviter = h
            .manager
            .create_superuser(&account, "admin@example.com", "admin_password")
            .await
            .unwrap();

        let request = InvitationRequest {
            email: "Jane@Example.com".to_string(),
            role: None,
            first_name: Some("Jane".to_string()),
            last_name: None,
        };

        let invitation = h.manager.invite_user(&inviter, &request).await.unwrap();

        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.entity_id, invitation.id);
        assert_eq!(h.sender.sent()[0].to, "jane@example.com");

        let invited = h.store.find_user_by_id(&invitation.invited_user_id).await.unwrap();
        assert_eq!(invited.account_id, account.id);
        assert!(h.oauth.auth_user("jane@example.com", "anything").await.is_err());

        let found = h
            .store
            .find_invitation_by_reference(&invitation.reference)
            .await
            .unwrap();
        let user = h.manager.confirm_invitation(&found, "jane_password").await.unwrap();
        assert!(user.confirmed);
        assert!(h.oauth.auth_user("jane@example.com", "jane_password").await.is_ok());

        assert!(matches!(
            h.store.find_invitation_by_reference(&invitation.reference).await,
            Err(IdentityError::NotFound("Invitation"))
        ));
    }

    #[tokio::test]
    async fn test_create_superuser() {
        let h = setup().await;
        let account = create_test_account(&h).await;

        let user = h
            .manager
            .create_superuser(&account, "admin@example.com", "admin_password")
            .await
            .unwrap();
        assert!(user.is_superuser());
        assert!(user.confirmed);
        assert_eq!(count(&h.db, "SELECT COUNT(*) FROM confirmations").await, 0);
    }

    #[tokio::test]
    async fn test_update_user_keeps_unspecified_fields() {
        let h = setup().await;
        let account = create_test_account(&h).await;
        let user = h
            .manager
            .create_user(&account, &user_request("john@example.com"))
            .await
            .unwrap();

        let updated = h
            .manager
            .update_user(
                &user,
                &UpdateUserRequest {
                    first_name: None,
                    last_name: Some("Reese".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name.as_deref(), Some("John"));
        assert_eq!(updated.last_name.as_deref(), Some("Reese"));
    }
}
