//! Record shapes for each pipeline stage.
//!
//! A [`Batch`] of loosely-typed queue messages goes in, the transformer
//! turns it into [`RawRecord`] rows for the audit table and
//! [`CuratedRecord`] rows for the query table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default currency when a message omits it.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// A single message as read from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Queue position of this message (Kafka offset, or line index for the file queue).
    pub position: i64,
    /// Decoded JSON object.
    pub payload: Map<String, Value>,
}

impl QueueMessage {
    pub fn new(position: i64, payload: Map<String, Value>) -> Self {
        Self { position, payload }
    }

    /// Returns a payload field, treating explicit JSON nulls as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name).filter(|v| !v.is_null())
    }
}

/// An ordered set of messages produced by one fetch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Identity of the source that produced the batch (topic/partition or file path).
    pub source: String,
    /// Cursor position the fetch started from.
    pub start: i64,
    /// Cursor position that a commit of this batch advances to.
    pub end: i64,
    pub messages: Vec<QueueMessage>,
}

impl Batch {
    pub fn new(source: impl Into<String>, start: i64, end: i64, messages: Vec<QueueMessage>) -> Self {
        Self {
            source: source.into(),
            start,
            end,
            messages,
        }
    }

    /// An empty poll at `position`.
    pub fn empty(source: impl Into<String>, position: i64) -> Self {
        Self::new(source, position, position, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Stable identity of this batch: the same cursor window always yields the same key.
    pub fn key(&self) -> String {
        format!("{}@{}", self.source, self.start)
    }
}

/// Amount bucket used for aggregate reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmountBucket {
    #[serde(rename = "<20")]
    Under20,
    #[serde(rename = "20-100")]
    From20To100,
    #[serde(rename = "100-250")]
    From100To250,
    #[serde(rename = "250-500")]
    From250To500,
    #[serde(rename = ">=500")]
    AtLeast500,
}

impl AmountBucket {
    /// Buckets are half-open: `[20, 100)` is `20-100`.
    pub fn from_amount(amount: f64) -> Self {
        if amount < 20.0 {
            Self::Under20
        } else if amount < 100.0 {
            Self::From20To100
        } else if amount < 250.0 {
            Self::From100To250
        } else if amount < 500.0 {
            Self::From250To500
        } else {
            Self::AtLeast500
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Under20 => "<20",
            Self::From20To100 => "20-100",
            Self::From100To250 => "100-250",
            Self::From250To500 => "250-500",
            Self::AtLeast500 => ">=500",
        }
    }

    /// Parse a stored bucket label.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<20" => Some(Self::Under20),
            "20-100" => Some(Self::From20To100),
            "100-250" => Some(Self::From100To250),
            "250-500" => Some(Self::From250To500),
            ">=500" => Some(Self::AtLeast500),
            _ => None,
        }
    }
}

impl std::fmt::Display for AmountBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit-trail row for `raw_transactions`. Insert-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub transaction_id: String,
    pub event_ts: DateTime<Utc>,
    /// Original message with coerced `event_ts` and `amount`.
    pub payload: Value,
    pub ingested_at: DateTime<Utc>,
}

/// Query-optimized row for `transactions_flat`. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedRecord {
    pub transaction_id: String,
    pub event_ts: DateTime<Utc>,
    pub event_date: NaiveDate,
    pub event_hour: i32,
    pub event_dayofweek: String,
    pub user_id: i64,
    pub amount: f64,
    pub amount_bucket: AmountBucket,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub city: Option<String>,
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub currency: String,
    pub ingested_at: DateTime<Utc>,
}

/// Output of one transform call: both row shapes, in batch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedBatch {
    pub raw: Vec<RawRecord>,
    pub curated: Vec<CuratedRecord>,
}

impl TransformedBatch {
    pub fn len(&self) -> usize {
        self.curated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curated.is_empty()
    }
}

/// A batch set aside after repeated validation failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedBatch {
    /// `{source}@{start}`, unique per fetched range
    pub batch_key: String,
    pub source: String,
    pub start: i64,
    pub end: i64,
    pub reason: String,
    /// Original payloads as a JSON array
    pub payloads: Value,
    pub rejected_at: DateTime<Utc>,
}

impl RejectedBatch {
    pub fn from_batch(batch: &Batch, reason: impl Into<String>, rejected_at: DateTime<Utc>) -> Self {
        let payloads = batch
            .messages
            .iter()
            .map(|m| Value::Object(m.payload.clone()))
            .collect();

        Self {
            batch_key: batch.key(),
            source: batch.source.clone(),
            start: batch.start,
            end: batch.end,
            reason: reason.into(),
            payloads: Value::Array(payloads),
            rejected_at,
        }
    }
}
