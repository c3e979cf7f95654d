//! Connection pool wrapper over Postgres or SQLite.

use crate::config::StoreConfig;
use pipeline_core::{Error, Result, StoreErrorCode};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Backend-specific pool. The backend is chosen from the URL scheme.
#[derive(Clone)]
pub enum StorePool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Store client with connection pooling.
#[derive(Clone)]
pub struct StoreClient {
    pool: StorePool,
    config: StoreConfig,
}

impl StoreClient {
    /// Connect using `config.url`.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);

        let pool = if config.is_postgres() {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(acquire_timeout)
                .connect(&config.url)
                .await
                .map_err(|e| unavailable("connect", e))?;
            StorePool::Postgres(pool)
        } else if config.is_sqlite() {
            let options = SqliteConnectOptions::from_str(&config.url)
                .map_err(|e| Error::config(format!("Invalid SQLite URL {}: {}", config.url, e)))?
                .create_if_missing(true);

            // Every connection to `:memory:` is a separate database, so keep exactly one alive.
            let pool_options = if config.is_in_memory() {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                SqlitePoolOptions::new().max_connections(config.max_connections)
            };

            let pool = pool_options
                .acquire_timeout(acquire_timeout)
                .connect_with(options)
                .await
                .map_err(|e| unavailable("connect", e))?;
            StorePool::Sqlite(pool)
        } else {
            return Err(Error::config(format!(
                "Unsupported store URL scheme: {}",
                config.url
            )));
        };

        let client = Self { pool, config };
        info!(backend = client.backend(), "Connected to store");
        Ok(client)
    }

    /// A fresh in-memory SQLite store.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(StoreConfig::in_memory()).await
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        match self.pool {
            StorePool::Postgres(_) => "postgres",
            StorePool::Sqlite(_) => "sqlite",
        }
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        match &self.pool {
            StorePool::Postgres(pool) => pool.close().await,
            StorePool::Sqlite(pool) => pool.close().await,
        }
    }
}

pub(crate) fn unavailable(operation: &str, e: sqlx::Error) -> Error {
    Error::store(
        StoreErrorCode::Unavailable,
        format!("{} failed: {}", operation, e),
    )
}

pub(crate) fn write_failed(table: &str, e: sqlx::Error) -> Error {
    Error::store(
        StoreErrorCode::WriteFailed,
        format!("write to {} failed: {}", table, e),
    )
}
