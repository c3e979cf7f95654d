//! Pipeline scheduler: the in-process stand-in for an external orchestrator.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use pipeline_core::Result;
use store::TransactionStore;
use telemetry::{health, log_snapshot, metrics};

use crate::config::SchedulerConfig;
use crate::cycle::{CycleController, CycleOutcome, CycleReport};
use crate::quality::{QualityGate, QualityReport};

/// Failed runs in a row before a component reports unhealthy instead of degraded.
const UNHEALTHY_AFTER_FAILURES: u64 = 3;

/// Drives cycles, quality checks and metrics logging on fixed tickers.
pub struct PipelineScheduler {
    config: SchedulerConfig,
    controller: Arc<CycleController>,
    store: Arc<dyn TransactionStore>,
    shutdown: watch::Sender<bool>,
}

impl PipelineScheduler {
    pub fn new(
        config: SchedulerConfig,
        controller: Arc<CycleController>,
        store: Arc<dyn TransactionStore>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            controller,
            store,
            shutdown,
        }
    }

    pub fn controller(&self) -> &Arc<CycleController> {
        &self.controller
    }

    /// Starts the cycle, quality and metrics tickers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_cycles().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_quality_checks().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_log().await;
        }));

        info!(
            cycle_interval_secs = self.config.cycle_interval_secs,
            quality_interval_secs = self.config.quality_interval_secs,
            quality_window_hours = self.config.quality_window_hours,
            "Pipeline scheduler started"
        );
        handles
    }

    /// Stop all tickers. A cycle already running finishes first; the
    /// handles returned by [`start`](Self::start) resolve once it has.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// One cycle followed by one quality check, for externally triggered runs.
    pub async fn run_once(&self) -> (CycleReport, Result<QualityReport>) {
        let report = self.controller.run_once().await;
        let quality = QualityGate::check(self.store.as_ref(), self.config.quality_window()).await;
        (report, quality)
    }

    async fn run_cycles(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.cycle_interval());
        // A slow cycle delays the next tick instead of bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            let report = self.controller.run_once().await;
            if report.is_success() {
                health().cycle.set_healthy();
            } else {
                if let CycleOutcome::Failed { reason, .. } = &report.outcome {
                    health()
                        .cycle
                        .record_failure(reason.clone(), UNHEALTHY_AFTER_FAILURES);
                }
                warn!(
                    cycle_id = %report.cycle_id,
                    failure_class = ?report.failure_class(),
                    "Cycle will be retried on the next tick"
                );
            }
        }
        info!("Cycle ticker stopped");
    }

    async fn run_quality_checks(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.quality_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            match QualityGate::check(self.store.as_ref(), self.config.quality_window()).await {
                Ok(report) if report.passed() => health().quality.set_healthy(),
                Ok(report) => health().quality.set_unhealthy(report.violations.join("; ")),
                Err(e) => {
                    error!(failure_class = %e.class(), "Quality check could not run: {}", e);
                    health()
                        .quality
                        .record_failure(e.to_string(), UNHEALTHY_AFTER_FAILURES);
                }
            }
        }
    }

    async fn run_metrics_log(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.metrics_log_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
            log_snapshot(&metrics().snapshot());
            let report = health().report();
            info!(status = ?report.status, "Pipeline health");
        }
    }
}
