use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{DatabaseConfig, OrchestratorError, OrchestratorResult};
use orchestrator_domain::JobRepository;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::sqlite::SqliteJobRepository;

/// Owns the SQLite pool and hands out repositories over it
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open the pool and apply pending migrations
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let in_memory = config.url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(&config.url)?;
        }

        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `sqlite::memory:` is its own database, so the
        // pool must keep exactly one connection alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;

        info!("database ready at {}", config.url);
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> OrchestratorResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::DatabaseOperation(format!("migration failed: {e}")))?;

        debug!("database migrations applied");
        Ok(())
    }

    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }
}

fn ensure_parent_dir(url: &str) -> OrchestratorResult<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::DatabaseOperation(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }

    Ok(())
}
