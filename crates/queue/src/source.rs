//! The record source contract.

use crate::config::{FileQueueConfig, RedpandaConfig, SourceKind};
use crate::consumer::Consumer;
use crate::file::FileQueue;
use async_trait::async_trait;
use pipeline_core::{Batch, Result};
use std::sync::Arc;
use std::time::Duration;

/// A durable queue with a manual acknowledgment boundary.
///
/// `fetch` always reads from the last committed cursor, so a batch that
/// is fetched but never committed is handed out again by the next fetch.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch up to `max_size` records, waiting at most `timeout` for the first one.
    async fn fetch(&self, max_size: usize, timeout: Duration) -> Result<Batch>;

    /// Durably advance the cursor past the most recent fetch.
    ///
    /// A commit with no fetched batch pending is a no-op.
    async fn commit(&self) -> Result<()>;

    /// Human-readable identity used in logs and batch keys.
    fn name(&self) -> String;

    /// Drop cached connections after a failure. Sources without connections ignore it.
    async fn reset(&self) {}
}

/// Build the source `kind` selects. Connections are opened lazily on first fetch.
pub fn open_source(
    kind: SourceKind,
    redpanda: &RedpandaConfig,
    file_queue: &FileQueueConfig,
) -> Arc<dyn RecordSource> {
    match kind {
        SourceKind::Redpanda => Arc::new(Consumer::new(redpanda.clone())),
        SourceKind::File => Arc::new(FileQueue::new(file_queue.clone())),
    }
}
