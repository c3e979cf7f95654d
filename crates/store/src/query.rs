//! Read queries: quality-gate counts and row lookups.

use crate::client::{unavailable, StoreClient, StorePool};
use chrono::{DateTime, Utc};
use pipeline_core::{AmountBucket, CuratedRecord, Error, Result, StoreErrorCode};
use sqlx::types::Json;
use sqlx::Row;

/// Tables owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Raw,
    Curated,
    Rejected,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw_transactions",
            Self::Curated => "transactions_flat",
            Self::Rejected => "rejected_batches",
        }
    }
}

const PG_COUNT_CURATED_SINCE: &str =
    "SELECT COUNT(*) FROM transactions_flat WHERE event_ts >= $1";
const SQLITE_COUNT_CURATED_SINCE: &str =
    "SELECT COUNT(*) FROM transactions_flat WHERE event_ts >= ?";

const PG_COUNT_NULL_KEYS_SINCE: &str = "SELECT COUNT(*) FROM transactions_flat \
    WHERE event_ts >= $1 AND (transaction_id IS NULL OR user_id IS NULL)";
const SQLITE_COUNT_NULL_KEYS_SINCE: &str = "SELECT COUNT(*) FROM transactions_flat \
    WHERE event_ts >= ? AND (transaction_id IS NULL OR user_id IS NULL)";

const CURATED_SELECT: &str = "SELECT transaction_id, event_ts, event_date, event_hour, \
    event_dayofweek, user_id, amount, amount_bucket, merchant, category, city, status, \
    payment_method, currency, ingested_at FROM transactions_flat";

macro_rules! decode_curated {
    ($row:expr) => {{
        let row = $row;
        let bucket: String = row.try_get("amount_bucket").map_err(decode_err)?;
        CuratedRecord {
            transaction_id: row.try_get("transaction_id").map_err(decode_err)?,
            event_ts: row.try_get("event_ts").map_err(decode_err)?,
            event_date: row.try_get("event_date").map_err(decode_err)?,
            event_hour: row.try_get("event_hour").map_err(decode_err)?,
            event_dayofweek: row.try_get("event_dayofweek").map_err(decode_err)?,
            user_id: row.try_get("user_id").map_err(decode_err)?,
            amount: row.try_get("amount").map_err(decode_err)?,
            amount_bucket: AmountBucket::parse(&bucket).ok_or_else(|| {
                Error::store(
                    StoreErrorCode::Unavailable,
                    format!("unknown amount_bucket {:?}", bucket),
                )
            })?,
            merchant: row.try_get("merchant").map_err(decode_err)?,
            category: row.try_get("category").map_err(decode_err)?,
            city: row.try_get("city").map_err(decode_err)?,
            status: row.try_get("status").map_err(decode_err)?,
            payment_method: row.try_get("payment_method").map_err(decode_err)?,
            currency: row.try_get("currency").map_err(decode_err)?,
            ingested_at: row.try_get("ingested_at").map_err(decode_err)?,
        }
    }};
}

fn decode_err(e: sqlx::Error) -> Error {
    unavailable("decode", e)
}

async fn count_since(
    client: &StoreClient,
    pg_sql: &str,
    sqlite_sql: &str,
    since: DateTime<Utc>,
) -> Result<u64> {
    let count: i64 = match client.pool() {
        StorePool::Postgres(pool) => sqlx::query_scalar(pg_sql).bind(since).fetch_one(pool).await,
        StorePool::Sqlite(pool) => {
            sqlx::query_scalar(sqlite_sql)
                .bind(since)
                .fetch_one(pool)
                .await
        }
    }
    .map_err(|e| unavailable("count", e))?;

    Ok(count.max(0) as u64)
}

/// Curated rows with `event_ts >= since`.
pub async fn count_curated_since(client: &StoreClient, since: DateTime<Utc>) -> Result<u64> {
    count_since(
        client,
        PG_COUNT_CURATED_SINCE,
        SQLITE_COUNT_CURATED_SINCE,
        since,
    )
    .await
}

/// Curated rows with `event_ts >= since` missing `transaction_id` or `user_id`.
///
/// Always zero while the NOT NULL constraints are in place; the check
/// guards against schema drift.
pub async fn count_null_keys_since(client: &StoreClient, since: DateTime<Utc>) -> Result<u64> {
    count_since(
        client,
        PG_COUNT_NULL_KEYS_SINCE,
        SQLITE_COUNT_NULL_KEYS_SINCE,
        since,
    )
    .await
}

/// Total rows in `table`.
pub async fn count_rows(client: &StoreClient, table: Table) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
    let count: i64 = match client.pool() {
        StorePool::Postgres(pool) => sqlx::query_scalar(&sql).fetch_one(pool).await,
        StorePool::Sqlite(pool) => sqlx::query_scalar(&sql).fetch_one(pool).await,
    }
    .map_err(|e| unavailable("count", e))?;

    Ok(count.max(0) as u64)
}

/// Look up one curated row.
pub async fn get_curated(client: &StoreClient, transaction_id: &str) -> Result<Option<CuratedRecord>> {
    match client.pool() {
        StorePool::Postgres(pool) => {
            let sql = format!("{} WHERE transaction_id = $1", CURATED_SELECT);
            let row = sqlx::query(&sql)
                .bind(transaction_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| unavailable("select", e))?;
            Ok(match row {
                Some(row) => Some(decode_curated!(&row)),
                None => None,
            })
        }
        StorePool::Sqlite(pool) => {
            let sql = format!("{} WHERE transaction_id = ?", CURATED_SELECT);
            let row = sqlx::query(&sql)
                .bind(transaction_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| unavailable("select", e))?;
            Ok(match row {
                Some(row) => Some(decode_curated!(&row)),
                None => None,
            })
        }
    }
}

/// Look up the stored payload of one raw row.
pub async fn get_raw_payload(
    client: &StoreClient,
    transaction_id: &str,
) -> Result<Option<serde_json::Value>> {
    let payload: Option<Json<serde_json::Value>> = match client.pool() {
        StorePool::Postgres(pool) => {
            sqlx::query_scalar("SELECT payload FROM raw_transactions WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(pool)
                .await
        }
        StorePool::Sqlite(pool) => {
            sqlx::query_scalar("SELECT payload FROM raw_transactions WHERE transaction_id = ?")
                .bind(transaction_id)
                .fetch_optional(pool)
                .await
        }
    }
    .map_err(|e| unavailable("select", e))?;

    Ok(payload.map(|Json(value)| value))
}
