/// Application context and dependency injection
use crate::{
    account::{AccountManager, AccountStore},
    auth::CredentialResolver,
    config::ServerConfig,
    db,
    error::IdentityResult,
    mailer::{EmailFactory, EmailSender, Mailer},
    notifier::Notifier,
    oauth::OAuthService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub oauth: Arc<OAuthService>,
    pub store: Arc<AccountStore>,
    pub accounts: Arc<AccountManager>,
    pub resolver: Arc<CredentialResolver>,
    pub notifier: Notifier,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> IdentityResult<Self> {
        // Validate configuration
        config.validate()?;

        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..Default::default()
        };
        let pool = db::create_pool(&config.storage.database_path, options).await?;

        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email is not configured; notifications will be logged as failed");
        }

        Ok(Self::with_sender(Arc::new(config), pool, Arc::new(mailer)))
    }

    /// Wire services over an existing pool and email sender
    pub fn with_sender(
        config: Arc<ServerConfig>,
        db: SqlitePool,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        let oauth = Arc::new(OAuthService::new(db.clone(), config.clone()));
        let store = Arc::new(AccountStore::new(db.clone()));
        let notifier = Notifier::new(
            db.clone(),
            sender,
            EmailFactory::new(&config.service.public_url),
        );
        let accounts = Arc::new(AccountManager::new(
            db.clone(),
            config.clone(),
            oauth.clone(),
            notifier.clone(),
        ));
        let resolver = Arc::new(CredentialResolver::new(oauth.clone(), store.clone()));

        Self {
            config,
            db,
            oauth,
            store,
            accounts,
            resolver,
            notifier,
        }
    }

    /// Create the bootstrap account and superuser when configured and absent
    ///
    /// This is the only path that creates superusers.
    pub async fn bootstrap(&self) -> IdentityResult<()> {
        let Some(bootstrap) = &self.config.bootstrap else {
            return Ok(());
        };

        let account = match self.store.find_account_by_name(&bootstrap.account_name).await {
            Ok(account) => account,
            Err(crate::error::IdentityError::NotFound(_)) => {
                tracing::info!(account = %bootstrap.account_name, "Creating bootstrap account");
                self.accounts
                    .create_account(
                        &bootstrap.account_name,
                        &bootstrap.account_description,
                        &bootstrap.client_key,
                        &bootstrap.client_secret,
                        &bootstrap.redirect_uri,
                    )
                    .await?
            }
            Err(e) => return Err(e),
        };

        if let Some(superuser) = &bootstrap.superuser {
            if !self.oauth.user_exists(&superuser.email).await? {
                tracing::info!(account = %account.name, "Creating bootstrap superuser");
                self.accounts
                    .create_superuser(&account, &superuser.email, &superuser.password)
                    .await?;
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapConfig, SuperuserConfig};
    use crate::mailer::testing::RecordingSender;
    use std::path::PathBuf;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (_dir, pool) = db::test_pool().await;
        let mut config = ServerConfig::for_tests(PathBuf::from(":memory:"));
        config.bootstrap = Some(BootstrapConfig {
            account_name: "Tessera".to_string(),
            account_description: "Default account".to_string(),
            client_key: "tessera".to_string(),
            client_secret: "tessera_secret".to_string(),
            redirect_uri: "http://localhost:8080".to_string(),
            superuser: Some(SuperuserConfig {
                email: "admin@example.com".to_string(),
                password: "admin_password".to_string(),
            }),
        });

        let ctx = AppContext::with_sender(
            Arc::new(config),
            pool.clone(),
            Arc::new(RecordingSender::default()),
        );

        assert_ok!(ctx.bootstrap().await);
        assert_ok!(ctx.bootstrap().await);

        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(accounts, 1);

        let admin = ctx.store.find_user_by_email("admin@example.com").await.unwrap();
        assert!(admin.is_superuser());
    }
}
