/// Database layer for Tessera
///
/// Manages the SQLite connection pool and embedded migrations, and holds the
/// row models shared by the OAuth and account subsystems.

pub mod models;

use crate::error::{IdentityError, IdentityResult};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Sqlite, Transaction,
};
use std::path::Path;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> IdentityResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> IdentityResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| IdentityError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> IdentityResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Open a write transaction that takes the write lock up front
///
/// Concurrent writers wait on the busy timeout rather than failing with
/// SQLITE_BUSY_SNAPSHOT after reading a stale snapshot.
pub async fn begin_write(pool: &SqlitePool) -> IdentityResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Whether the error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Fresh migrated database in a temporary directory
///
/// The returned `TempDir` must outlive the pool.
#[cfg(test)]
pub async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("test.sqlite"), DatabaseOptions::default())
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_seed_reference_data() {
        let (_dir, pool) = test_pool().await;
        test_connection(&pool).await.unwrap();

        let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(roles, 2);

        let default_scope: String =
            sqlx::query_scalar("SELECT scope FROM oauth_scopes WHERE is_default = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(default_scope, "read");
    }

    #[tokio::test]
    async fn test_unique_violation_detection() {
        let (_dir, pool) = test_pool().await;

        let insert = "INSERT INTO roles (id, name) VALUES ('user', 'Duplicate')";
        let err = sqlx::query(insert).execute(&pool).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
