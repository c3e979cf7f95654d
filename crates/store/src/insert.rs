//! Batch writes.
//!
//! Each call runs in a single transaction: either every row of the batch
//! lands or none does.

use crate::client::{write_failed, StoreClient, StorePool};
use pipeline_core::{CuratedRecord, RawRecord, RejectedBatch, Result};
use sqlx::types::Json;
use telemetry::metrics;
use tracing::debug;

const PG_INSERT_RAW: &str = "INSERT INTO raw_transactions \
    (transaction_id, event_ts, payload, ingested_at) \
    VALUES ($1, $2, $3, $4) \
    ON CONFLICT (transaction_id) DO NOTHING";

const SQLITE_INSERT_RAW: &str = "INSERT INTO raw_transactions \
    (transaction_id, event_ts, payload, ingested_at) \
    VALUES (?, ?, ?, ?) \
    ON CONFLICT (transaction_id) DO NOTHING";

const UPSERT_CURATED_SET: &str = "ON CONFLICT (transaction_id) DO UPDATE SET \
    event_ts = excluded.event_ts, \
    event_date = excluded.event_date, \
    event_hour = excluded.event_hour, \
    event_dayofweek = excluded.event_dayofweek, \
    user_id = excluded.user_id, \
    amount = excluded.amount, \
    amount_bucket = excluded.amount_bucket, \
    merchant = excluded.merchant, \
    category = excluded.category, \
    city = excluded.city, \
    status = excluded.status, \
    payment_method = excluded.payment_method, \
    currency = excluded.currency, \
    ingested_at = excluded.ingested_at";

const CURATED_COLUMNS: &str = "(transaction_id, event_ts, event_date, event_hour, event_dayofweek, \
    user_id, amount, amount_bucket, merchant, category, city, status, payment_method, \
    currency, ingested_at)";

const PG_INSERT_REJECTED: &str = "INSERT INTO rejected_batches \
    (batch_key, source, start_position, end_position, reason, payloads, rejected_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7) \
    ON CONFLICT (batch_key) DO NOTHING";

const SQLITE_INSERT_REJECTED: &str = "INSERT INTO rejected_batches \
    (batch_key, source, start_position, end_position, reason, payloads, rejected_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT (batch_key) DO NOTHING";

fn pg_upsert_curated() -> String {
    format!(
        "INSERT INTO transactions_flat {} VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) {}",
        CURATED_COLUMNS, UPSERT_CURATED_SET
    )
}

fn sqlite_upsert_curated() -> String {
    format!(
        "INSERT INTO transactions_flat {} VALUES \
         (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) {}",
        CURATED_COLUMNS, UPSERT_CURATED_SET
    )
}

macro_rules! bind_curated {
    ($query:expr, $row:expr) => {
        $query
            .bind(&$row.transaction_id)
            .bind($row.event_ts)
            .bind($row.event_date)
            .bind($row.event_hour)
            .bind(&$row.event_dayofweek)
            .bind($row.user_id)
            .bind($row.amount)
            .bind($row.amount_bucket.as_str())
            .bind($row.merchant.as_deref())
            .bind($row.category.as_deref())
            .bind($row.city.as_deref())
            .bind($row.status.as_deref())
            .bind($row.payment_method.as_deref())
            .bind(&$row.currency)
            .bind($row.ingested_at)
    };
}

macro_rules! write_rows {
    ($pool:expr, $table:expr, $rows:expr, |$row:ident| $query:expr) => {{
        let mut tx = $pool.begin().await.map_err(|e| write_failed($table, e))?;
        let mut affected = 0u64;
        for $row in $rows {
            affected += $query
                .execute(&mut *tx)
                .await
                .map_err(|e| write_failed($table, e))?
                .rows_affected();
        }
        tx.commit().await.map_err(|e| write_failed($table, e))?;
        affected
    }};
}

async fn write_raw_rows(client: &StoreClient, rows: &[RawRecord]) -> Result<u64> {
    let inserted = match client.pool() {
        StorePool::Postgres(pool) => write_rows!(pool, "raw_transactions", rows, |row| {
            sqlx::query(PG_INSERT_RAW)
                .bind(&row.transaction_id)
                .bind(row.event_ts)
                .bind(Json(&row.payload))
                .bind(row.ingested_at)
        }),
        StorePool::Sqlite(pool) => write_rows!(pool, "raw_transactions", rows, |row| {
            sqlx::query(SQLITE_INSERT_RAW)
                .bind(&row.transaction_id)
                .bind(row.event_ts)
                .bind(Json(&row.payload))
                .bind(row.ingested_at)
        }),
    };
    Ok(inserted)
}

async fn write_curated_rows(client: &StoreClient, rows: &[CuratedRecord]) -> Result<u64> {
    let written = match client.pool() {
        StorePool::Postgres(pool) => {
            let sql = pg_upsert_curated();
            write_rows!(pool, "transactions_flat", rows, |row| bind_curated!(
                sqlx::query(&sql),
                row
            ))
        }
        StorePool::Sqlite(pool) => {
            let sql = sqlite_upsert_curated();
            write_rows!(pool, "transactions_flat", rows, |row| bind_curated!(
                sqlx::query(&sql),
                row
            ))
        }
    };
    Ok(written)
}

/// Insert raw rows; rows whose `transaction_id` already exists are left untouched.
///
/// Returns the number of newly inserted rows.
pub async fn insert_raw(client: &StoreClient, rows: &[RawRecord]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let start = std::time::Instant::now();
    let inserted = write_raw_rows(client, rows)
        .await
        .inspect_err(|_| metrics().store_errors.inc())?;

    metrics().raw_rows_written.inc_by(inserted);
    metrics().write_latency_ms.observe(start.elapsed().as_millis() as u64);

    debug!(
        rows = rows.len(),
        inserted = inserted,
        skipped = rows.len() as u64 - inserted,
        latency_ms = %start.elapsed().as_millis(),
        "Wrote raw_transactions"
    );

    Ok(inserted)
}

/// Upsert curated rows; an existing `transaction_id` is overwritten.
///
/// Returns the number of rows written.
pub async fn upsert_curated(client: &StoreClient, rows: &[CuratedRecord]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let start = std::time::Instant::now();
    let written = write_curated_rows(client, rows)
        .await
        .inspect_err(|_| metrics().store_errors.inc())?;

    metrics().curated_rows_written.inc_by(rows.len() as u64);
    metrics().write_latency_ms.observe(start.elapsed().as_millis() as u64);

    debug!(
        rows = rows.len(),
        latency_ms = %start.elapsed().as_millis(),
        "Wrote transactions_flat"
    );

    Ok(written)
}

/// Record a quarantined batch. Returns `false` if this batch key was already recorded.
pub async fn insert_rejected(client: &StoreClient, batch: &RejectedBatch) -> Result<bool> {
    let affected = match client.pool() {
        StorePool::Postgres(pool) => sqlx::query(PG_INSERT_REJECTED)
            .bind(&batch.batch_key)
            .bind(&batch.source)
            .bind(batch.start)
            .bind(batch.end)
            .bind(&batch.reason)
            .bind(Json(&batch.payloads))
            .bind(batch.rejected_at)
            .execute(pool)
            .await
            .map(|r| r.rows_affected()),
        StorePool::Sqlite(pool) => sqlx::query(SQLITE_INSERT_REJECTED)
            .bind(&batch.batch_key)
            .bind(&batch.source)
            .bind(batch.start)
            .bind(batch.end)
            .bind(&batch.reason)
            .bind(Json(&batch.payloads))
            .bind(batch.rejected_at)
            .execute(pool)
            .await
            .map(|r| r.rows_affected()),
    }
    .map_err(|e| {
        metrics().store_errors.inc();
        write_failed("rejected_batches", e)
    })?;

    if affected > 0 {
        metrics().batches_quarantined.inc();
    }
    debug!(batch_key = %batch.batch_key, recorded = affected > 0, "Wrote rejected_batches");
    Ok(affected > 0)
}
