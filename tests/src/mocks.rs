//! In-memory implementations of the source and store contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pipeline_core::{
    Batch, CuratedRecord, Error, QueueMessage, RawRecord, RejectedBatch, Result, StoreErrorCode,
};
use queue::RecordSource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::TransactionStore;

/// Queue held in memory. Positions are indexes into the pushed messages.
#[derive(Clone, Default)]
pub struct MemorySource {
    messages: Arc<Mutex<Vec<Value>>>,
    committed: Arc<Mutex<i64>>,
    pending: Arc<Mutex<Option<i64>>>,
    should_fail: Arc<AtomicBool>,
    fetch_delay: Arc<Mutex<Option<Duration>>>,
    fetches: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = Value>) -> Self {
        let source = Self::new();
        source.push_all(messages);
        source
    }

    pub fn push(&self, message: Value) {
        self.messages.lock().push(message);
    }

    pub fn push_all(&self, messages: impl IntoIterator<Item = Value>) {
        self.messages.lock().extend(messages);
    }

    /// Committed cursor position.
    pub fn committed(&self) -> i64 {
        *self.committed.lock()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Make every fetch sleep before answering.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch(&self, max_size: usize, _timeout: Duration) -> Result<Batch> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::queue("Mock source failure"));
        }

        let start = self.committed();
        let window: Vec<(usize, Value)> = self
            .messages
            .lock()
            .iter()
            .cloned()
            .enumerate()
            .skip(start as usize)
            .take(max_size)
            .collect();

        // Non-object messages are covered by the cursor but not delivered
        let end = start + window.len() as i64;
        let messages = window
            .into_iter()
            .filter_map(|(i, v)| match v {
                Value::Object(payload) => Some(QueueMessage::new(i as i64, payload)),
                _ => None,
            })
            .collect();

        *self.pending.lock() = Some(end);
        Ok(Batch::new(self.name(), start, end, messages))
    }

    async fn commit(&self) -> Result<()> {
        if let Some(end) = self.pending.lock().take() {
            *self.committed.lock() = end;
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

/// Store held in memory, with the same conflict rules as the real tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    raw: Arc<Mutex<BTreeMap<String, RawRecord>>>,
    curated: Arc<Mutex<BTreeMap<String, CuratedRecord>>>,
    rejected: Arc<Mutex<BTreeMap<String, RejectedBatch>>>,
    fail_raw: Arc<AtomicBool>,
    fail_curated: Arc<AtomicBool>,
    write_delay: Arc<Mutex<Option<Duration>>>,
    null_key_rows: Arc<Mutex<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_rows(&self) -> Vec<RawRecord> {
        self.raw.lock().values().cloned().collect()
    }

    pub fn curated_rows(&self) -> Vec<CuratedRecord> {
        self.curated.lock().values().cloned().collect()
    }

    pub fn curated(&self, transaction_id: &str) -> Option<CuratedRecord> {
        self.curated.lock().get(transaction_id).cloned()
    }

    pub fn rejected_batches(&self) -> Vec<RejectedBatch> {
        self.rejected.lock().values().cloned().collect()
    }

    /// Fail raw writes.
    pub fn set_fail_raw(&self, fail: bool) {
        self.fail_raw.store(fail, Ordering::SeqCst);
    }

    /// Fail curated writes (raw writes still succeed).
    pub fn set_fail_curated(&self, fail: bool) {
        self.fail_curated.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Pretend this many rows in any window lack a key, as after schema drift.
    pub fn set_null_key_rows(&self, rows: u64) {
        *self.null_key_rows.lock() = rows;
    }

    async fn delay(&self) {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn write_raw(&self, rows: &[RawRecord]) -> Result<u64> {
        self.delay().await;
        if self.fail_raw.load(Ordering::SeqCst) {
            return Err(Error::store(StoreErrorCode::WriteFailed, "Mock raw write failure"));
        }

        let mut raw = self.raw.lock();
        for row in rows {
            raw.entry(row.transaction_id.clone())
                .or_insert_with(|| row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn write_curated(&self, rows: &[CuratedRecord]) -> Result<u64> {
        self.delay().await;
        if self.fail_curated.load(Ordering::SeqCst) {
            return Err(Error::store(
                StoreErrorCode::WriteFailed,
                "Mock curated write failure",
            ));
        }

        let mut curated = self.curated.lock();
        for row in rows {
            curated.insert(row.transaction_id.clone(), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn write_rejected(&self, batch: &RejectedBatch) -> Result<bool> {
        let mut rejected = self.rejected.lock();
        if rejected.contains_key(&batch.batch_key) {
            return Ok(false);
        }
        rejected.insert(batch.batch_key.clone(), batch.clone());
        Ok(true)
    }

    async fn count_curated_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count = self
            .curated
            .lock()
            .values()
            .filter(|row| row.event_ts >= since)
            .count();
        Ok(count as u64)
    }

    async fn count_null_keys_since(&self, _since: DateTime<Utc>) -> Result<u64> {
        Ok(*self.null_key_rows.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_source_redelivers_until_commit() {
        let source = MemorySource::with_messages([json!({"a": 1}), json!({"a": 2})]);

        let first = source.fetch(10, Duration::ZERO).await.unwrap();
        let again = source.fetch(10, Duration::ZERO).await.unwrap();
        assert_eq!(first, again);

        source.commit().await.unwrap();
        assert_eq!(source.committed(), 2);
        assert!(source.fetch(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_source_failure_mode() {
        let source = MemorySource::new();
        source.set_should_fail(true);
        assert!(source.fetch(10, Duration::ZERO).await.is_err());
    }
}
