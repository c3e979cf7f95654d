//! Redpanda consumer for reading transactions with manual commit.
//!
//! Uses rskafka for Kafka-compatible message consumption with:
//! - Committed-offset reads for at-least-once delivery
//! - Bounded fetches (record count and wait time)
//! - Offsets persisted in a checkpoint file per group/topic/partition

use crate::checkpoint::OffsetCheckpoint;
use crate::config::RedpandaConfig;
use crate::source::RecordSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Batch, Error, QueueMessage, Result};
use rskafka::client::{
    error::{Error as ClientError, ProtocolError},
    partition::{OffsetAt, PartitionClient, UnknownTopicHandling},
    ClientBuilder, Credentials, SaslConfig,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Upper bound on a single message, used to size fetch requests.
const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Slack on top of the broker-side wait before we give up on a fetch.
const FETCH_GRACE: Duration = Duration::from_secs(5);

/// Creates a TLS configuration for Redpanda Cloud.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Offset to resume from given the retained range `[earliest, latest]`.
///
/// A checkpoint outside that range (deleted by retention, or from a
/// recreated topic) restarts at the earliest retained record.
fn clamp_to_retained(stored: i64, earliest: i64, latest: i64) -> i64 {
    if (earliest..=latest).contains(&stored) {
        stored
    } else {
        earliest
    }
}

async fn retained_range(client: &PartitionClient) -> Result<(i64, i64)> {
    let earliest = client
        .get_offset(OffsetAt::Earliest)
        .await
        .map_err(|e| Error::queue(format!("Failed to get earliest offset: {}", e)))?;
    let latest = client
        .get_offset(OffsetAt::Latest)
        .await
        .map_err(|e| Error::queue(format!("Failed to get latest offset: {}", e)))?;
    Ok((earliest, latest))
}

/// Builds an rskafka client, with TLS and SASL when credentials are configured.
pub(crate) async fn build_client(config: &RedpandaConfig) -> Result<rskafka::client::Client> {
    let mut builder = ClientBuilder::new(vec![config.broker_string()]);

    if let (Some(username), Some(password)) = (&config.sasl_username, &config.sasl_password) {
        builder = builder
            .tls_config(create_tls_config())
            .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                username.clone(),
                password.clone(),
            )));
    }

    builder
        .build()
        .await
        .map_err(|e| Error::queue(format!("Failed to connect to Redpanda: {}", e)))
}

/// Consumer for one topic partition.
pub struct Consumer {
    config: RedpandaConfig,
    checkpoint: OffsetCheckpoint,
    /// Partition client, created lazily and dropped on error
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    /// Committed offset (next offset to read); -1 until initialized
    committed: AtomicI64,
    /// Offset a commit would advance to, set by the last fetch
    pending: Mutex<Option<i64>>,
}

impl Consumer {
    /// Creates a new consumer. No connection is made until the first fetch.
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            group_id = %config.group_id,
            topic = %config.topic,
            partition = config.partition,
            "Creating Redpanda consumer"
        );

        let checkpoint = OffsetCheckpoint::new(config.checkpoint_path());

        Self {
            config,
            checkpoint,
            partition_client: RwLock::new(None),
            committed: AtomicI64::new(-1),
            pending: Mutex::new(None),
        }
    }

    /// Initializes the partition client and the starting offset.
    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.partition_client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = build_client(&self.config).await?;

        let partition_client = client
            .partition_client(
                self.config.topic.clone(),
                self.config.partition,
                UnknownTopicHandling::Error,
            )
            .await
            .map_err(|e| Error::queue(format!("Failed to get partition client: {}", e)))?;

        let partition_client = Arc::new(partition_client);

        if self.committed.load(Ordering::SeqCst) < 0 {
            let (earliest, latest) = retained_range(&partition_client).await?;
            let offset = match self.checkpoint.load().await? {
                Some(stored) => {
                    let offset = clamp_to_retained(stored, earliest, latest);
                    if offset != stored {
                        warn!(
                            stored = stored,
                            earliest = earliest,
                            latest = latest,
                            "Checkpoint offset no longer retained, resuming from earliest"
                        );
                    }
                    offset
                }
                None => earliest,
            };

            self.committed.store(offset, Ordering::SeqCst);

            info!(
                topic = %self.config.topic,
                partition = self.config.partition,
                offset = offset,
                "Consumer initialized at offset"
            );
        }

        {
            let mut client_guard = self.partition_client.write().await;
            *client_guard = Some(partition_client.clone());
        }

        Ok(partition_client)
    }

    /// The broker no longer has `current`. Returns an empty batch whose
    /// commit moves the cursor to the earliest retained offset.
    async fn recover_out_of_range(&self, client: &PartitionClient, current: i64) -> Result<Batch> {
        let (earliest, latest) = retained_range(client).await?;
        let offset = clamp_to_retained(current, earliest, latest);
        warn!(
            topic = %self.config.topic,
            partition = self.config.partition,
            offset = current,
            earliest = earliest,
            latest = latest,
            reset_to = offset,
            "Offset out of range, resetting to earliest"
        );

        *self.pending.lock() = Some(offset);
        Ok(Batch::empty(self.name(), offset))
    }

    /// Returns the committed offset (-1 before the first fetch).
    pub fn committed_offset(&self) -> i64 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Returns the consumer configuration.
    pub fn config(&self) -> &RedpandaConfig {
        &self.config
    }

    /// Checks if the consumer can reach its partition.
    pub async fn health_check(&self) -> bool {
        match self.ensure_connected().await {
            Ok(_) => true,
            Err(e) => {
                error!("Consumer health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl RecordSource for Consumer {
    async fn fetch(&self, max_size: usize, timeout: Duration) -> Result<Batch> {
        let client = self.ensure_connected().await?;

        let start = Instant::now();
        let current = self.committed.load(Ordering::SeqCst);
        let max_bytes = max_size
            .max(1)
            .saturating_mul(MAX_MESSAGE_BYTES)
            .min(i32::MAX as usize) as i32;
        let max_wait_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        let fetched = tokio::time::timeout(
            timeout + FETCH_GRACE,
            client.fetch_records(current, 1..max_bytes, max_wait_ms),
        )
        .await
        .map_err(|_| Error::timeout("fetch", timeout.as_millis() as u64))?;

        let (mut records, high_watermark) = match fetched {
            Ok(fetched) => fetched,
            Err(ClientError::ServerError {
                protocol_error: ProtocolError::OffsetOutOfRange,
                ..
            }) => return self.recover_out_of_range(&client, current).await,
            Err(e) => {
                error!("Fetch error: {}", e);
                return Err(Error::queue(format!("Failed to fetch records: {}", e)));
            }
        };

        // Compressed record batches can start before the requested offset.
        records.retain(|r| r.offset >= current);
        records.sort_by_key(|r| r.offset);
        records.truncate(max_size);

        let mut messages = Vec::with_capacity(records.len());
        let mut malformed = 0u64;
        let mut next = current;

        for record in records {
            next = record.offset + 1;

            let Some(value) = record.record.value else {
                malformed += 1;
                warn!(offset = record.offset, "Skipping record without value");
                continue;
            };

            match serde_json::from_slice::<serde_json::Value>(&value) {
                Ok(serde_json::Value::Object(payload)) => {
                    messages.push(QueueMessage::new(record.offset, payload));
                }
                Ok(_) => {
                    malformed += 1;
                    warn!(offset = record.offset, "Skipping non-object record");
                }
                Err(e) => {
                    malformed += 1;
                    warn!(
                        offset = record.offset,
                        error = %e,
                        "Failed to deserialize record"
                    );
                }
            }
        }

        metrics().records_fetched.inc_by(messages.len() as u64);
        if malformed > 0 {
            metrics().records_malformed.inc_by(malformed);
        }
        metrics()
            .consumer_lag
            .set(high_watermark.saturating_sub(next).max(0) as u64);

        let elapsed = start.elapsed();
        metrics().fetch_latency_ms.observe(elapsed.as_millis() as u64);
        debug!(
            records = messages.len(),
            malformed = malformed,
            offset_start = current,
            offset_end = next,
            high_watermark = high_watermark,
            latency_ms = %elapsed.as_millis(),
            "Fetched batch from Redpanda"
        );

        *self.pending.lock() = Some(next);

        Ok(Batch::new(self.name(), current, next, messages))
    }

    async fn commit(&self) -> Result<()> {
        let Some(offset) = *self.pending.lock() else {
            return Ok(());
        };

        let prev = self.committed.load(Ordering::SeqCst);
        if offset != prev {
            self.checkpoint.store(offset).await?;
            self.committed.store(offset, Ordering::SeqCst);
        }
        self.pending.lock().take();

        debug!(
            partition = self.config.partition,
            prev_offset = prev,
            new_offset = offset,
            "Committed offset"
        );

        Ok(())
    }

    fn name(&self) -> String {
        format!("{}/{}", self.config.topic, self.config.partition)
    }

    async fn reset(&self) {
        let mut client = self.partition_client.write().await;
        *client = None;
        info!("Consumer connection reset");
    }
}
