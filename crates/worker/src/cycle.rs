//! Cycle controller: one fetch → transform → load → commit pass per call.
//!
//! The cursor only advances after both writes succeed, so a failed cycle
//! leaves the batch to be redelivered. Both writes are keyed by
//! `transaction_id`, which makes the redelivery converge.

use crate::config::{CycleConfig, PoisonPolicy};
use chrono::Utc;
use parking_lot::Mutex;
use pipeline_core::{transform, Batch, Error, FailureClass, RejectedBatch, Result};
use queue::RecordSource;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::TransactionStore;
use telemetry::metrics;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Slack on top of the poll timeout before a fetch is considered stuck.
const FETCH_GRACE: Duration = Duration::from_secs(5);

/// Controller state. `Failed` is per cycle; the next cycle starts from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Fetching,
    Transforming,
    Loading,
    Acknowledging,
    Failed,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing to do; the empty poll was acknowledged.
    Empty,
    /// Both writes succeeded and the cursor advanced.
    /// Counts are rows attempted; replayed raw rows are skipped by the store.
    Committed { raw_written: u64, curated_written: u64 },
    /// The batch was set aside in `rejected_batches` and the cursor advanced.
    Quarantined { reason: String },
    /// Nothing was acknowledged; the batch will be redelivered.
    Failed {
        class: FailureClass,
        code: Option<&'static str>,
        reason: String,
    },
}

/// Result of one `run_once` call.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub outcome: CycleOutcome,
    /// State the cycle ended in
    pub final_state: CycleState,
    /// Records fetched (0 if the fetch failed)
    pub batch_size: usize,
    /// Fetched cursor window, if the fetch succeeded
    pub window: Option<(i64, i64)>,
    pub acknowledged: bool,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, CycleOutcome::Failed { .. })
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self.outcome {
            CycleOutcome::Failed { class, .. } => Some(class),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PoisonTracker {
    batch_key: String,
    attempts: u32,
}

/// Per-cycle bookkeeping filled in as the cycle progresses.
#[derive(Debug, Default)]
struct Progress {
    batch_size: usize,
    window: Option<(i64, i64)>,
}

/// Drives single cycles. Owns no timer: callers decide when to run.
pub struct CycleController {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn TransactionStore>,
    config: CycleConfig,
    in_flight: tokio::sync::Mutex<()>,
    state: Mutex<CycleState>,
    poison: Mutex<Option<PoisonTracker>>,
    consecutive_failures: Mutex<u64>,
}

impl CycleController {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn TransactionStore>,
        config: CycleConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            in_flight: tokio::sync::Mutex::new(()),
            state: Mutex::new(CycleState::Idle),
            poison: Mutex::new(None),
            consecutive_failures: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock()
    }

    fn set_state(&self, state: CycleState) {
        debug!(state = ?state, "Cycle state");
        *self.state.lock() = state;
    }

    /// Run one cycle. Never panics on pipeline errors: every failure is
    /// reported in the returned [`CycleReport`].
    ///
    /// A call made while another cycle is in flight returns immediately
    /// with a `Busy` failure and does not touch the source.
    pub async fn run_once(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();

        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!(cycle_id = %cycle_id, "Cycle already in flight, skipping");
            return CycleReport {
                cycle_id,
                outcome: failed_outcome(&Error::CycleInProgress),
                final_state: CycleState::Failed,
                batch_size: 0,
                window: None,
                acknowledged: false,
                duration_ms: 0,
            };
        };

        let started = Instant::now();
        let mut progress = Progress::default();
        let result = self.execute(&mut progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics().cycle_latency_ms.observe(duration_ms);

        let report = match result {
            Ok(outcome) => {
                *self.consecutive_failures.lock() = 0;
                metrics().consecutive_failures.set(0);

                info!(
                    cycle_id = %cycle_id,
                    batch_size = progress.batch_size,
                    outcome = ?outcome,
                    duration_ms = duration_ms,
                    "Cycle finished"
                );

                CycleReport {
                    cycle_id,
                    outcome,
                    final_state: CycleState::Idle,
                    batch_size: progress.batch_size,
                    window: progress.window,
                    acknowledged: true,
                    duration_ms,
                }
            }
            Err(e) => {
                self.set_state(CycleState::Failed);
                let failures = {
                    let mut count = self.consecutive_failures.lock();
                    *count += 1;
                    *count
                };
                metrics().consecutive_failures.set(failures);
                self.record_failure(&e).await;

                error!(
                    cycle_id = %cycle_id,
                    batch_size = progress.batch_size,
                    failure_class = %e.class(),
                    consecutive_failures = failures,
                    error = %e,
                    "Cycle failed, batch not acknowledged"
                );

                CycleReport {
                    cycle_id,
                    outcome: failed_outcome(&e),
                    final_state: CycleState::Failed,
                    batch_size: progress.batch_size,
                    window: progress.window,
                    acknowledged: false,
                    duration_ms,
                }
            }
        };

        self.set_state(CycleState::Idle);
        report
    }

    async fn execute(&self, progress: &mut Progress) -> Result<CycleOutcome> {
        self.set_state(CycleState::Fetching);
        let batch = self.fetch().await?;
        progress.batch_size = batch.len();
        progress.window = Some((batch.start, batch.end));

        if batch.is_empty() {
            metrics().empty_polls.inc();
            self.acknowledge(&batch).await?;
            debug!(position = batch.end, "Empty poll");
            return Ok(CycleOutcome::Empty);
        }
        metrics().batches_fetched.inc();

        self.set_state(CycleState::Transforming);
        let transformed = match transform(&batch) {
            Ok(transformed) => {
                self.poison.lock().take();
                transformed
            }
            Err(e) => return self.handle_rejection(&batch, e).await,
        };

        self.set_state(CycleState::Loading);
        let raw_written = self
            .bounded("write raw_transactions", self.store.write_raw(&transformed.raw))
            .await?;
        let curated_written = self
            .bounded(
                "write transactions_flat",
                self.store.write_curated(&transformed.curated),
            )
            .await?;

        self.acknowledge(&batch).await?;

        Ok(CycleOutcome::Committed {
            raw_written,
            curated_written,
        })
    }

    async fn fetch(&self) -> Result<Batch> {
        let poll_timeout = self.config.poll_timeout();
        let limit = poll_timeout + FETCH_GRACE;

        tokio::time::timeout(limit, self.source.fetch(self.config.batch_size, poll_timeout))
            .await
            .map_err(|_| Error::timeout("fetch", limit.as_millis() as u64))?
    }

    /// Bound a store call by the write timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.write_timeout();
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| Error::timeout(operation, limit.as_millis() as u64))?
    }

    async fn acknowledge(&self, batch: &Batch) -> Result<()> {
        self.set_state(CycleState::Acknowledging);
        self.source.commit().await?;
        metrics().batches_committed.inc();
        debug!(
            source = %batch.source,
            start = batch.start,
            end = batch.end,
            "Acknowledged batch"
        );
        Ok(())
    }

    /// Validation failed: either surface the error (the batch is redelivered)
    /// or, once the poison policy threshold is reached, quarantine it.
    async fn handle_rejection(&self, batch: &Batch, e: Error) -> Result<CycleOutcome> {
        let PoisonPolicy::Quarantine { after_attempts } = self.config.poison_policy else {
            return Err(e);
        };

        let attempts = {
            let key = batch.key();
            let mut poison = self.poison.lock();
            let attempts = match poison.as_ref() {
                Some(tracker) if tracker.batch_key == key => tracker.attempts + 1,
                _ => 1,
            };
            *poison = Some(PoisonTracker {
                batch_key: key,
                attempts,
            });
            attempts
        };

        if attempts < after_attempts {
            warn!(
                batch_key = %batch.key(),
                attempts = attempts,
                after_attempts = after_attempts,
                "Batch rejected, will retry"
            );
            return Err(e);
        }

        let reason = e.to_string();
        let rejected = RejectedBatch::from_batch(batch, &reason, Utc::now());
        self.bounded("write rejected_batches", self.store.write_rejected(&rejected))
            .await?;
        metrics().validation_failures.inc();
        self.acknowledge(batch).await?;
        self.poison.lock().take();

        error!(
            batch_key = %rejected.batch_key,
            batch_size = batch.len(),
            attempts = attempts,
            reason = %reason,
            "Poison batch quarantined to rejected_batches"
        );

        Ok(CycleOutcome::Quarantined { reason })
    }

    async fn record_failure(&self, e: &Error) {
        match e.class() {
            FailureClass::TransientSource => {
                metrics().source_errors.inc();
                self.source.reset().await;
            }
            FailureClass::Validation => metrics().validation_failures.inc(),
            FailureClass::StoreWrite if matches!(e, Error::Timeout { .. }) => {
                metrics().store_errors.inc()
            }
            _ => {}
        }
    }
}

fn failed_outcome(e: &Error) -> CycleOutcome {
    CycleOutcome::Failed {
        class: e.class(),
        code: e.error_code(),
        reason: e.to_string(),
    }
}
