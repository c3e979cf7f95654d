//! Batch validation and enrichment.
//!
//! Turns a [`Batch`] of queue messages into raw and curated rows. The
//! transform is all-or-nothing: a single message with a null mandatory
//! field rejects the whole batch, and nothing is returned for it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::{
    AmountBucket, Batch, CuratedRecord, QueueMessage, RawRecord, TransformedBatch,
    DEFAULT_CURRENCY,
};

/// Fields that must be non-null in every curated row, in reporting order.
pub const MANDATORY_FIELDS: [&str; 4] = ["transaction_id", "user_id", "amount", "event_ts"];

/// Naive datetime layouts accepted for `event_ts`; read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Offset-carrying layouts that RFC 3339 parsing rejects.
const OFFSET_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Transform a batch, stamping `ingested_at` with the current time.
pub fn transform(batch: &Batch) -> Result<TransformedBatch> {
    transform_at(batch, Utc::now())
}

/// Transform a batch with an explicit processing time.
///
/// Every row of the batch gets the same `ingested_at`.
pub fn transform_at(batch: &Batch, ingested_at: DateTime<Utc>) -> Result<TransformedBatch> {
    if batch.is_empty() {
        return Ok(TransformedBatch::default());
    }

    let mut out = TransformedBatch {
        raw: Vec::with_capacity(batch.len()),
        curated: Vec::with_capacity(batch.len()),
    };
    let mut missing = [false; MANDATORY_FIELDS.len()];
    let mut bad_rows = 0;

    for message in &batch.messages {
        match curate(message, ingested_at) {
            Ok((raw, curated)) => {
                out.raw.push(raw);
                out.curated.push(curated);
            }
            Err(fields) => {
                bad_rows += 1;
                for (seen, flagged) in missing.iter_mut().zip(fields) {
                    *seen |= flagged;
                }
            }
        }
    }

    if bad_rows > 0 {
        let fields = MANDATORY_FIELDS
            .iter()
            .zip(missing)
            .filter(|(_, flagged)| *flagged)
            .map(|(name, _)| *name);
        return Err(Error::missing_fields(fields, bad_rows));
    }

    Ok(out)
}

/// Validate and enrich one message.
///
/// On failure returns a mask over [`MANDATORY_FIELDS`] of the fields that were null.
pub fn curate(
    message: &QueueMessage,
    ingested_at: DateTime<Utc>,
) -> std::result::Result<(RawRecord, CuratedRecord), [bool; 4]> {
    let transaction_id = message.field("transaction_id").and_then(coerce_id);
    let user_id = message.field("user_id").and_then(coerce_user_id);
    let amount = message.field("amount").and_then(coerce_amount);
    let event_ts = message.field("event_ts").and_then(coerce_timestamp);

    let (transaction_id, user_id, amount, event_ts) =
        match (transaction_id, user_id, amount, event_ts) {
            (Some(id), Some(user), Some(amount), Some(ts)) => (id, user, amount, ts),
            (id, user, amount, ts) => {
                return Err([id.is_none(), user.is_none(), amount.is_none(), ts.is_none()])
            }
        };

    let text = |name: &str| message.field(name).and_then(coerce_text);

    let curated = CuratedRecord {
        transaction_id: transaction_id.clone(),
        event_ts,
        event_date: event_ts.date_naive(),
        event_hour: event_ts.hour() as i32,
        event_dayofweek: event_ts.format("%A").to_string(),
        user_id,
        amount,
        amount_bucket: AmountBucket::from_amount(amount),
        merchant: text("merchant"),
        category: text("category"),
        city: text("city"),
        status: text("status"),
        payment_method: text("payment_method"),
        currency: text("currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        ingested_at,
    };

    let mut payload = message.payload.clone();
    payload.insert("event_ts".into(), Value::String(event_ts.to_rfc3339()));
    payload.insert("amount".into(), Value::from(amount));

    let raw = RawRecord {
        transaction_id,
        event_ts,
        payload: Value::Object(payload),
        ingested_at,
    };

    Ok((raw, curated))
}

/// Parse an event timestamp. Strings only; anything unparsable is `None`.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(s, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Parse an amount from a JSON number or numeric string.
pub fn coerce_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

/// Parse a user id. Whole floats (`42.0`) are accepted.
pub fn coerce_user_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
