//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which record source a pipeline instance reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Redpanda / Kafka topic partition
    #[default]
    Redpanda,
    /// Newline-delimited JSON file
    File,
}

/// Redpanda consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topic to consume
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Consumer group identity; names the offset checkpoint
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Partition owned by this pipeline instance
    #[serde(default)]
    pub partition: i32,
    /// SASL username (for cloud authentication)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// Directory holding committed offsets
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

fn default_topic() -> String {
    "transactions".to_string()
}

fn default_group_id() -> String {
    "transactions-etl".to_string()
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/offsets")
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: default_topic(),
            group_id: default_group_id(),
            partition: 0,
            sasl_username: None,
            sasl_password: None,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    /// Checkpoint file for this group/topic/partition.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir.join(format!(
            "{}-{}-{}.offset",
            self.group_id, self.topic, self.partition
        ))
    }
}

/// JSONL file queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileQueueConfig {
    /// Queue file, one JSON object per line
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// Checkpoint file; defaults to `<path>.offset`
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
    /// Delay between polls while waiting for new lines
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue/transactions.jsonl")
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            checkpoint_path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl FileQueueConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Resolved checkpoint location.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path.clone().unwrap_or_else(|| {
            let mut name = self.path.as_os_str().to_owned();
            name.push(".offset");
            PathBuf::from(name)
        })
    }
}
