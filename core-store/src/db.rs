//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the offline store.
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for better concurrency (multiple readers, one writer)
//! - **Connection Pooling**: Configurable min/max connections with timeouts
//! - **Foreign Keys**: Enforced
//! - **Incremental Auto-Vacuum**: pages freed by eviction can be handed back
//!   to the filesystem with [`reclaim_space`]
//! - **Automatic Migrations**: Run on pool creation
//! - **Health Checks**: Connection validation
//!
//! In-memory databases are private to one connection, so
//! [`DatabaseConfig::in_memory`] pins the pool to a single connection that is
//! never recycled.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_store::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("offline.db")).await?;
//! ```

use crate::error::{Result, StoreError};
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL (`sqlite:<path>` or `sqlite::memory:`)
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Number of prepared statements cached per connection
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Create a configuration for a database file.
    ///
    /// A path of `:memory:` selects [`DatabaseConfig::in_memory`].
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }

        Self {
            database_url: format!("sqlite:{}", path.display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 100,
        }
    }

    /// Configuration for an in-memory database (tests, ephemeral sessions).
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    /// Set the minimum number of connections
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Check the settings before any connection is opened.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.is_in_memory() && self.max_connections != 1 {
            return Err("in-memory databases require exactly one connection".to_string());
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool, run migrations and perform a
/// health check.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the database cannot be
/// opened, or migrations fail.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    config.validate().map_err(StoreError::Unavailable)?;

    info!(
        database_url = %config.database_url,
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    // auto_vacuum only takes effect on a database created with it
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .auto_vacuum(SqliteAutoVacuum::Incremental)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        // Blobs are large; keep the page cache modest (16MB)
        .pragma("cache_size", "-16000")
        .statement_cache_capacity(config.statement_cache_capacity);

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            StoreError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(connections = pool.size(), "Database connection pool ready");
    Ok(pool)
}

/// Return free pages to the filesystem and truncate the WAL.
///
/// Deleting rows only marks their pages free, so the database and WAL files
/// keep their size until this runs. A checkpoint blocked by an open reader
/// is not an error; the WAL is truncated on a later call.
pub async fn reclaim_space(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("PRAGMA incremental_vacuum").execute(pool).await?;

    let (busy, wal_frames, checkpointed): (i64, i64, i64) =
        sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_one(pool)
            .await?;
    debug!(busy, wal_frames, checkpointed, "Reclaimed free pages");
    Ok(())
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        StoreError::Migration(e.to_string())
    })?;

    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        StoreError::Database(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[core_async::test]
    async fn test_create_test_pool_and_health_check() {
        let pool = create_test_pool().await.unwrap();
        assert!(health_check(&pool).await.is_ok());
    }

    #[test]
    fn test_memory_path_selects_single_connection() {
        let config = DatabaseConfig::new(":memory:");
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
        assert!(config.idle_timeout.is_none());
        assert!(config.max_lifetime.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_pool_sizes() {
        assert!(DatabaseConfig::in_memory().max_connections(4).validate().is_err());
        assert!(DatabaseConfig::new("offline.db")
            .min_connections(6)
            .validate()
            .is_err());
        assert!(DatabaseConfig::new("offline.db")
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .validate()
            .is_ok());
    }

    #[core_async::test]
    async fn test_file_database_uses_incremental_auto_vacuum() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(DatabaseConfig::new(dir.path().join("offline.db")))
            .await
            .unwrap();

        // 2 = INCREMENTAL
        let (mode,): (i64,) = sqlx::query_as("PRAGMA auto_vacuum")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, 2);
        assert!(reclaim_space(&pool).await.is_ok());
    }

    #[core_async::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ["downloads", "audio_cache", "playback_progress"] {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "{table} table should exist");
        }
    }

    #[core_async::test]
    async fn test_in_memory_state_survives_across_acquires() {
        let pool = create_test_pool().await.unwrap();

        sqlx::query(
            "INSERT INTO playback_progress (item_id, position_seconds, duration_seconds, last_played_at) VALUES ('a', 1.0, 2.0, 3)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playback_progress")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
