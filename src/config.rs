/// Configuration management for Tessera
use crate::error::{IdentityError, IdentityResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
///
/// Built once at startup and shared as an immutable `Arc<ServerConfig>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub oauth: OAuthConfig,
    pub lifetimes: LifetimeConfig,
    pub email: Option<EmailConfig>,
    pub security: SecurityConfig,
    pub bootstrap: Option<BootstrapConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL used when building links in outgoing emails
    pub public_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

/// Token issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_token_lifetime: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_lifetime: i64,
}

/// Lifetimes (seconds) of the emailed reference tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeConfig {
    pub confirmation: i64,
    pub invitation: i64,
    pub password_reset: i64,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            confirmation: 86400,
            invitation: 604800,
            password_reset: 3600,
        }
    }
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Redirect plain HTTP requests to HTTPS
    pub force_https: bool,
}

/// Account and superuser created at startup when absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub account_name: String,
    pub account_description: String,
    pub client_key: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub superuser: Option<SuperuserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperuserConfig {
    pub email: String,
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> IdentityResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("TESSERA_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("TESSERA_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| IdentityError::ValidationFailed("Invalid port number".to_string()))?;
        let public_url = env::var("TESSERA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));

        let database_path = env::var("TESSERA_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/tessera.sqlite"));
        let max_connections = env_or("TESSERA_DATABASE_MAX_CONNECTIONS", 10);

        let jwt_secret = env::var("TESSERA_JWT_SECRET")
            .map_err(|_| IdentityError::ValidationFailed("JWT secret required".to_string()))?;

        let defaults = LifetimeConfig::default();
        let lifetimes = LifetimeConfig {
            confirmation: env_or("TESSERA_CONFIRMATION_LIFETIME", defaults.confirmation),
            invitation: env_or("TESSERA_INVITATION_LIFETIME", defaults.invitation),
            password_reset: env_or("TESSERA_PASSWORD_RESET_LIFETIME", defaults.password_reset),
        };

        let email = if let Ok(smtp_url) = env::var("TESSERA_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("TESSERA_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let bootstrap = match (
            env::var("TESSERA_BOOTSTRAP_ACCOUNT_NAME"),
            env::var("TESSERA_BOOTSTRAP_CLIENT_KEY"),
            env::var("TESSERA_BOOTSTRAP_CLIENT_SECRET"),
        ) {
            (Ok(account_name), Ok(client_key), Ok(client_secret)) => {
                let superuser = match (
                    env::var("TESSERA_BOOTSTRAP_SUPERUSER_EMAIL"),
                    env::var("TESSERA_BOOTSTRAP_SUPERUSER_PASSWORD"),
                ) {
                    (Ok(email), Ok(password)) => Some(SuperuserConfig { email, password }),
                    _ => None,
                };

                Some(BootstrapConfig {
                    account_name,
                    account_description: env::var("TESSERA_BOOTSTRAP_ACCOUNT_DESCRIPTION")
                        .unwrap_or_default(),
                    client_key,
                    client_secret,
                    redirect_uri: env::var("TESSERA_BOOTSTRAP_REDIRECT_URI")
                        .unwrap_or_else(|_| public_url.clone()),
                    superuser,
                })
            }
            _ => None,
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
            },
            storage: StorageConfig {
                database_path,
                max_connections,
            },
            oauth: OAuthConfig {
                jwt_secret,
                access_token_lifetime: env_or("TESSERA_ACCESS_TOKEN_LIFETIME", 3600),
                refresh_token_lifetime: env_or("TESSERA_REFRESH_TOKEN_LIFETIME", 1209600),
            },
            lifetimes,
            email,
            security: SecurityConfig {
                force_https: env_or("TESSERA_FORCE_HTTPS", false),
            },
            bootstrap,
            logging: LoggingConfig {
                level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "tessera=debug,tower_http=debug".to_string()),
                json: env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> IdentityResult<()> {
        if self.service.hostname.is_empty() {
            return Err(IdentityError::ValidationFailed(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.oauth.jwt_secret.len() < 32 {
            return Err(IdentityError::ValidationFailed(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.oauth.access_token_lifetime <= 0 || self.oauth.refresh_token_lifetime <= 0 {
            return Err(IdentityError::ValidationFailed(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        if self.lifetimes.confirmation <= 0
            || self.lifetimes.invitation <= 0
            || self.lifetimes.password_reset <= 0
        {
            return Err(IdentityError::ValidationFailed(
                "Reference lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration used by unit tests
    #[cfg(test)]
    pub fn for_tests(database_path: PathBuf) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
            },
            storage: StorageConfig {
                database_path,
                max_connections: 5,
            },
            oauth: OAuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-0123".to_string(),
                access_token_lifetime: 3600,
                refresh_token_lifetime: 1209600,
            },
            lifetimes: LifetimeConfig::default(),
            email: None,
            security: SecurityConfig::default(),
            bootstrap: None,
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
