//! Newline-delimited JSON file queue.
//!
//! A local stand-in for the broker: producers append one JSON object per
//! line, and the cursor is the number of lines consumed. Only lines that
//! end in a newline are read, so a half-written tail is left for later.

use crate::checkpoint::OffsetCheckpoint;
use crate::config::FileQueueConfig;
use crate::source::RecordSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Batch, Error, QueueMessage, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, warn};

/// File-backed record source.
pub struct FileQueue {
    config: FileQueueConfig,
    checkpoint: OffsetCheckpoint,
    /// Committed line count; -1 until loaded from the checkpoint
    committed: AtomicI64,
    pending: Mutex<Option<i64>>,
}

impl FileQueue {
    pub fn new(config: FileQueueConfig) -> Self {
        let checkpoint = OffsetCheckpoint::new(config.checkpoint_path());
        Self {
            config,
            checkpoint,
            committed: AtomicI64::new(-1),
            pending: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FileQueueConfig {
        &self.config
    }

    /// Returns the committed line count (-1 before the first fetch).
    pub fn committed_position(&self) -> i64 {
        self.committed.load(Ordering::SeqCst)
    }

    async fn committed_or_load(&self) -> Result<i64> {
        let current = self.committed.load(Ordering::SeqCst);
        if current >= 0 {
            return Ok(current);
        }
        let loaded = self.checkpoint.load().await?.unwrap_or(0);
        self.committed.store(loaded, Ordering::SeqCst);
        Ok(loaded)
    }

    /// Raw file bytes. Lines are decoded one at a time, so a bad byte only
    /// spoils the line it is on.
    async fn read_queue(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.config.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::queue(format!(
                "Failed to read queue file {}: {}",
                self.config.path.display(),
                e
            ))),
        }
    }
}

/// Scan complete lines from `start`, taking at most `max_size` records.
///
/// Returns the messages, the number of malformed lines skipped (invalid
/// UTF-8 included), and the cursor position after the last consumed line.
fn scan_lines(content: &[u8], start: i64, max_size: usize) -> (Vec<QueueMessage>, u64, i64) {
    let mut messages = Vec::new();
    let mut malformed = 0;
    let mut next = start;

    let complete = content
        .split_inclusive(|b| *b == b'\n')
        .filter(|line| line.ends_with(b"\n"))
        .enumerate()
        .skip(start.max(0) as usize);

    for (index, line) in complete {
        let position = index as i64;

        if line.iter().all(u8::is_ascii_whitespace) {
            next = position + 1;
            continue;
        }
        if messages.len() >= max_size {
            break;
        }

        match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(payload)) => {
                messages.push(QueueMessage::new(position, payload));
            }
            Ok(_) => {
                malformed += 1;
                warn!(line = position + 1, "Skipping non-object line");
            }
            Err(e) => {
                malformed += 1;
                warn!(line = position + 1, error = %e, "Failed to parse queue line");
            }
        }
        next = position + 1;
    }

    (messages, malformed, next)
}

#[async_trait]
impl RecordSource for FileQueue {
    async fn fetch(&self, max_size: usize, timeout: Duration) -> Result<Batch> {
        let start = Instant::now();
        let current = self.committed_or_load().await?;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            let content = self.read_queue().await?;
            let (messages, malformed, next) = scan_lines(&content, current, max_size);

            let elapsed = start.elapsed();
            if next > current || elapsed >= timeout {
                metrics().records_fetched.inc_by(messages.len() as u64);
                if malformed > 0 {
                    metrics().records_malformed.inc_by(malformed);
                }
                metrics().fetch_latency_ms.observe(elapsed.as_millis() as u64);

                debug!(
                    records = messages.len(),
                    malformed = malformed,
                    line_start = current,
                    line_end = next,
                    "Fetched batch from queue file"
                );

                *self.pending.lock() = Some(next);
                return Ok(Batch::new(self.name(), current, next, messages));
            }

            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }

    async fn commit(&self) -> Result<()> {
        let Some(position) = *self.pending.lock() else {
            return Ok(());
        };

        if position != self.committed.load(Ordering::SeqCst) {
            self.checkpoint.store(position).await?;
            self.committed.store(position, Ordering::SeqCst);
        }
        self.pending.lock().take();

        debug!(position, "Committed queue file position");
        Ok(())
    }

    fn name(&self) -> String {
        self.config.path.display().to_string()
    }
}
