//! Quality gate and one-shot scheduler runs.

use chrono::{Duration, Utc};
use integration_tests::{fixtures, mocks::MemoryStore, setup::TestContext};
use pipeline_core::FailureClass;
use std::sync::Arc;
use store::TransactionStore;
use worker::{PipelineScheduler, QualityGate, SchedulerConfig};

/// Empty window is a violation
#[tokio::test]
async fn test_empty_window_is_violation() {
    let store = MemoryStore::new();
    let report = QualityGate::check(&store, Duration::hours(24)).await.unwrap();

    assert!(!report.passed());
    assert_eq!(report.row_count, 0);
    let err = report.into_result().unwrap_err();
    assert_eq!(err.class(), FailureClass::Quality);
}

/// Null keys are reported even when the window has rows
#[tokio::test]
async fn test_null_keys_are_violation() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 5));
    assert!(ctx.controller.run_once().await.is_success());
    ctx.store.set_null_key_rows(2);

    let report = QualityGate::check(&ctx.store, Duration::hours(24)).await.unwrap();
    assert_eq!(report.row_count, 5);
    assert_eq!(report.violations.len(), 1);
    assert!(report.violations[0].contains("2 rows"));
}

/// Rows outside the window do not count
#[tokio::test]
async fn test_rows_outside_window_do_not_count() {
    let ctx = TestContext::new();
    ctx.source.push(fixtures::transaction_at(
        "stale",
        9.0,
        Utc::now() - Duration::hours(30),
    ));
    assert!(ctx.controller.run_once().await.is_success());

    let day = QualityGate::check(&ctx.store, Duration::hours(24)).await.unwrap();
    assert!(!day.passed());

    let two_days = QualityGate::check(&ctx.store, Duration::hours(48)).await.unwrap();
    assert!(two_days.passed());
}

/// One-shot mode runs a cycle and a quality check
#[tokio::test]
async fn test_scheduler_run_once() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 3));

    let scheduler = PipelineScheduler::new(
        SchedulerConfig::default(),
        ctx.controller.clone(),
        Arc::new(ctx.store.clone()) as Arc<dyn TransactionStore>,
    );
    let (report, quality) = scheduler.run_once().await;

    assert!(report.is_success());
    let quality = quality.unwrap();
    assert!(quality.passed());
    assert_eq!(quality.row_count, 3);
}

/// Tickers drive cycles until shutdown; shutdown waits for the running cycle
#[tokio::test]
async fn test_scheduler_ticks_until_shutdown() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 4));

    let scheduler = Arc::new(PipelineScheduler::new(
        SchedulerConfig {
            cycle_interval_secs: 1,
            ..SchedulerConfig::default()
        },
        ctx.controller.clone(),
        Arc::new(ctx.store.clone()) as Arc<dyn TransactionStore>,
    ));
    let handles = scheduler.clone().start();

    // The first tick fires immediately
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    scheduler.shutdown();
    for handle in handles {
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("scheduler task did not stop")
            .unwrap();
    }

    assert_eq!(ctx.store.curated_rows().len(), 4);
    assert_eq!(ctx.source.committed(), 4);
}
