//! The store interface the cycle controller and quality gate depend on.

use crate::client::StoreClient;
use crate::{health, insert, query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::{CuratedRecord, RawRecord, RejectedBatch, Result};

/// Idempotent transaction store.
///
/// Writes are keyed by `transaction_id`. Each write call is atomic.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert-only audit write. Returns rows attempted; rows whose
    /// `transaction_id` already exists are skipped without error.
    async fn write_raw(&self, rows: &[RawRecord]) -> Result<u64>;

    /// Last-write-wins upsert. Returns rows written.
    async fn write_curated(&self, rows: &[CuratedRecord]) -> Result<u64>;

    /// Record a quarantined batch. Returns `false` if already recorded.
    async fn write_rejected(&self, batch: &RejectedBatch) -> Result<bool>;

    /// Curated rows with `event_ts >= since`.
    async fn count_curated_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Curated rows with `event_ts >= since` that lack `transaction_id` or `user_id`.
    async fn count_null_keys_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Connectivity probe.
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl TransactionStore for StoreClient {
    async fn write_raw(&self, rows: &[RawRecord]) -> Result<u64> {
        insert::insert_raw(self, rows).await?;
        Ok(rows.len() as u64)
    }

    async fn write_curated(&self, rows: &[CuratedRecord]) -> Result<u64> {
        insert::upsert_curated(self, rows).await
    }

    async fn write_rejected(&self, batch: &RejectedBatch) -> Result<bool> {
        insert::insert_rejected(self, batch).await
    }

    async fn count_curated_since(&self, since: DateTime<Utc>) -> Result<u64> {
        query::count_curated_since(self, since).await
    }

    async fn count_null_keys_since(&self, since: DateTime<Utc>) -> Result<u64> {
        query::count_null_keys_since(self, since).await
    }

    async fn is_healthy(&self) -> bool {
        health::check_connection(self).await
    }
}
