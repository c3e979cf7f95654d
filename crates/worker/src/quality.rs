//! Quality gate over the curated table.
//!
//! Read-only: failed assertions are reported, never repaired.

use chrono::{DateTime, Duration, Utc};
use pipeline_core::{Error, Result};
use serde::Serialize;
use store::TransactionStore;
use telemetry::metrics;
use tracing::{error, info};

/// Outcome of one quality check.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub checked_at: DateTime<Utc>,
    /// Start of the inspected window (inclusive)
    pub window_start: DateTime<Utc>,
    pub row_count: u64,
    pub null_key_rows: u64,
    /// One human-readable reason per failed assertion
    pub violations: Vec<String>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Convert a failed report into a `QualityViolation` error.
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(Error::quality(self.violations.join("; ")))
        }
    }
}

/// Windowed assertions over `transactions_flat`.
pub struct QualityGate;

impl QualityGate {
    /// Check the trailing `window` ending now.
    pub async fn check(store: &dyn TransactionStore, window: Duration) -> Result<QualityReport> {
        Self::check_at(store, window, Utc::now()).await
    }

    /// Check the window `[now - window, ∞)`.
    ///
    /// Asserts that the window is non-empty and that no row lacks
    /// `transaction_id` or `user_id`. Store errors are returned as errors,
    /// not as violations.
    pub async fn check_at(
        store: &dyn TransactionStore,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QualityReport> {
        let window_start = now - window;
        let row_count = store.count_curated_since(window_start).await?;
        let null_key_rows = store.count_null_keys_since(window_start).await?;

        let mut violations = Vec::new();
        if row_count == 0 {
            violations.push(format!(
                "no rows in transactions_flat since {}",
                window_start.to_rfc3339()
            ));
        }
        if null_key_rows > 0 {
            violations.push(format!(
                "{} rows with null transaction_id or user_id since {}",
                null_key_rows,
                window_start.to_rfc3339()
            ));
        }

        metrics().quality_checks.inc();
        let report = QualityReport {
            checked_at: now,
            window_start,
            row_count,
            null_key_rows,
            violations,
        };

        if report.passed() {
            info!(
                rows = report.row_count,
                window_hours = window.num_hours(),
                "Quality check passed"
            );
        } else {
            metrics().quality_violations.inc();
            error!(
                rows = report.row_count,
                null_key_rows = report.null_key_rows,
                violations = ?report.violations,
                "Quality check failed"
            );
        }

        Ok(report)
    }
}
