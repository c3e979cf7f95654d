//! Store health checks and schema setup.

use crate::client::{unavailable, StoreClient, StorePool};
use crate::schema::{postgres_tables, sqlite_tables};
use pipeline_core::Result;
use tracing::{debug, error};

/// Check store connection health.
pub async fn check_connection(client: &StoreClient) -> bool {
    let result: std::result::Result<i32, sqlx::Error> = match client.pool() {
        StorePool::Postgres(pool) => sqlx::query_scalar("SELECT 1").fetch_one(pool).await,
        StorePool::Sqlite(pool) => sqlx::query_scalar("SELECT 1").fetch_one(pool).await,
    };

    match result {
        Ok(_) => {
            debug!(backend = client.backend(), "Store connection healthy");
            true
        }
        Err(e) => {
            error!(backend = client.backend(), "Store health check failed: {}", e);
            false
        }
    }
}

/// Create tables and indexes if they do not exist.
pub async fn init_schema(client: &StoreClient) -> Result<()> {
    match client.pool() {
        StorePool::Postgres(pool) => {
            for ddl in postgres_tables() {
                sqlx::query(ddl)
                    .execute(pool)
                    .await
                    .map_err(|e| unavailable("DDL", e))?;
            }
        }
        StorePool::Sqlite(pool) => {
            for ddl in sqlite_tables() {
                sqlx::query(ddl)
                    .execute(pool)
                    .await
                    .map_err(|e| unavailable("DDL", e))?;
            }
        }
    }

    debug!(backend = client.backend(), "Store schema initialized");
    Ok(())
}
