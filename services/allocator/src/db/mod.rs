//! Database layer for the allocator.
//!
//! This module provides:
//! - Connection pool management
//! - Counter sequences and reservations (`PgSequenceStore`)
//! - The transactional outbox (`PgOutboxStore`)
//! - Students, mentors and the allocation commit (`PgDirectory`)
//!
//! The database layer uses SQLx with Postgres.

mod directory;
mod error;
mod outbox;
mod sequences;

pub use directory::PgDirectory;
pub use error::DbError;
pub use outbox::PgOutboxStore;
pub use sequences::PgSequenceStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::parsed;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/pairwise";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and
    /// `DB_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_lookup(var: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: var("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.database_url),
            max_connections: parsed(var, "DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: parsed(var, "DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            acquire_timeout: parsed(var, "DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            ..defaults
        }
    }
}

/// Shared Postgres pool plus constructors for the store handles.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a query and returns the server version string.
    pub async fn health_check(&self) -> Result<String, DbError> {
        sqlx::query_scalar::<_, String>("SELECT current_setting('server_version')")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    /// Run pending migrations.
    ///
    /// Migrations are loaded at runtime from the first directory that exists.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/allocator/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Get a sequence store handle.
    pub fn sequence_store(&self) -> PgSequenceStore {
        PgSequenceStore::new(self.pool.clone())
    }

    /// Get an outbox store handle.
    pub fn outbox_store(&self) -> PgOutboxStore {
        PgOutboxStore::new(self.pool.clone())
    }

    /// Get a student/mentor/allocation directory handle.
    pub fn directory(&self) -> PgDirectory {
        PgDirectory::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_from_lookup() {
        let empty = DbConfig::from_lookup(&|_: &str| None);
        assert_eq!(empty.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(empty.max_connections, 10);

        let config = DbConfig::from_lookup(&|key: &str| match key {
            "DATABASE_URL" => Some("postgres://db:5432/alloc".to_string()),
            "DB_MAX_CONNECTIONS" => Some("32".to_string()),
            "DB_MIN_CONNECTIONS" => Some("many".to_string()),
            "DB_ACQUIRE_TIMEOUT_SECS" => Some("2".to_string()),
            _ => None,
        });
        assert_eq!(config.database_url, "postgres://db:5432/alloc");
        assert_eq!(config.max_connections, 32);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }
}
