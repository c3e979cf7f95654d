//! Unified error types for the transaction pipeline.
//!
//! Error codes:
//! - SRC_001: Queue unreachable or fetch/commit failed
//! - VALID_001: Mandatory field missing in a batch
//! - DB_001-002: Store write and connection errors
//! - TIME_001: Bounded wait expired
//! - QUAL_001: Quality gate violation

use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// DB_001: Failed to write rows
    WriteFailed,
    /// DB_002: Failed to connect or bootstrap the schema
    Unavailable,
}

impl StoreErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WriteFailed => "DB_001",
            Self::Unavailable => "DB_002",
        }
    }
}

/// Coarse failure class, used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Queue unreachable; cursor untouched, retried next cycle.
    TransientSource,
    /// Batch rejected by the validator; not acknowledged.
    Validation,
    /// Store write failed; not acknowledged.
    StoreWrite,
    /// Reported out of band by the quality gate.
    Quality,
    /// Another cycle is already running.
    Busy,
    /// Anything else (configuration, serialization, bugs).
    Internal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientSource => "transient_source",
            Self::Validation => "validation",
            Self::StoreWrite => "store_write",
            Self::Quality => "quality",
            Self::Busy => "busy",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[SRC_001] {0}")]
    Source(String),

    /// A batch contained nulls in mandatory fields.
    #[error("[VALID_001] null values in mandatory fields: {} ({rows} rows)", .fields.join(", "))]
    MissingMandatoryField { fields: Vec<String>, rows: usize },

    #[error("[{code}] {message}")]
    Store { code: &'static str, message: String },

    #[error("[TIME_001] {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("[QUAL_001] quality check failed: {0}")]
    QualityViolation(String),

    #[error("a cycle is already in flight")]
    CycleInProgress,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a store error.
    pub fn store(code: StoreErrorCode, msg: impl Into<String>) -> Self {
        Self::Store {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn missing_fields<I, S>(fields: I, rows: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingMandatoryField {
            fields: fields.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    pub fn quality(reason: impl Into<String>) -> Self {
        Self::QualityViolation(reason.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error for logging and metrics.
    ///
    /// Timeouts are classified by the operation that expired: a stuck
    /// fetch is a source failure, a stuck write is a store failure.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Source(_) => FailureClass::TransientSource,
            Self::MissingMandatoryField { .. } => FailureClass::Validation,
            Self::Store { .. } => FailureClass::StoreWrite,
            Self::Timeout { operation, .. } if operation.starts_with("fetch") => {
                FailureClass::TransientSource
            }
            Self::Timeout { .. } => FailureClass::StoreWrite,
            Self::QualityViolation(_) => FailureClass::Quality,
            Self::CycleInProgress => FailureClass::Busy,
            Self::Config(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                FailureClass::Internal
            }
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Source(_) => Some("SRC_001"),
            Self::MissingMandatoryField { .. } => Some("VALID_001"),
            Self::Store { code, .. } => Some(code),
            Self::Timeout { .. } => Some("TIME_001"),
            Self::QualityViolation(_) => Some("QUAL_001"),
            _ => None,
        }
    }
}
