//! Failure handling in the cycle controller.
//!
//! Every failure must leave the batch unacknowledged so it is redelivered,
//! and a later successful cycle must converge to the same store state.

use integration_tests::{
    fixtures,
    setup::{fast_cycle_config, TestContext},
};
use pipeline_core::FailureClass;
use std::time::Duration;
use worker::{CycleConfig, CycleOutcome, CycleState, PoisonPolicy};

fn failure(outcome: &CycleOutcome) -> (FailureClass, Option<&'static str>, String) {
    match outcome {
        CycleOutcome::Failed {
            class,
            code,
            reason,
        } => (*class, *code, reason.clone()),
        other => panic!("expected a failed cycle, got {:?}", other),
    }
}

/// One row missing user_id in 500 rejects the whole batch: zero writes, no commit
#[tokio::test]
async fn test_one_bad_row_rejects_whole_batch() {
    let ctx = TestContext::new();
    let mut messages = fixtures::transactions("tx", 499);
    messages.insert(250, fixtures::without(fixtures::transaction("bad", 12.0), "user_id"));
    ctx.source.push_all(messages);

    let report = ctx.controller.run_once().await;

    let (class, code, reason) = failure(&report.outcome);
    assert_eq!(class, FailureClass::Validation);
    assert_eq!(code, Some("VALID_001"));
    assert!(reason.contains("user_id"), "reason: {}", reason);
    assert_eq!(report.batch_size, 500);
    assert_eq!(report.final_state, CycleState::Failed);
    assert!(!report.acknowledged);

    assert!(ctx.store.raw_rows().is_empty());
    assert!(ctx.store.curated_rows().is_empty());
    assert_eq!(ctx.source.committed(), 0);
    assert_eq!(ctx.controller.state(), CycleState::Idle);
}

/// Every offending field is named, in canonical order
#[tokio::test]
async fn test_rejection_names_all_missing_fields() {
    let ctx = TestContext::new();
    ctx.source.push_all([
        fixtures::with_null(fixtures::transaction("a", 1.0), "event_ts"),
        fixtures::without(fixtures::transaction("b", 1.0), "amount"),
        fixtures::with_null(fixtures::transaction("c", 1.0), "transaction_id"),
    ]);

    let report = ctx.controller.run_once().await;
    let (_, _, reason) = failure(&report.outcome);

    let positions: Vec<usize> = ["transaction_id", "amount", "event_ts"]
        .iter()
        .map(|field| reason.find(field).expect(field))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "reason: {}", reason);
    assert!(!reason.contains("user_id"));
}

/// With the retry policy a rejected batch is redelivered forever
#[tokio::test]
async fn test_retry_policy_never_advances_past_bad_batch() {
    let ctx = TestContext::new();
    ctx.source
        .push(fixtures::with_null(fixtures::transaction("bad", 1.0), "amount"));

    for _ in 0..3 {
        let report = ctx.controller.run_once().await;
        assert_eq!(report.failure_class(), Some(FailureClass::Validation));
        assert_eq!(report.window, Some((0, 1)));
    }
    assert_eq!(ctx.source.commit_count(), 0);
    assert!(ctx.store.rejected_batches().is_empty());
}

/// The quarantine policy sets the batch aside after N rejections and moves on
#[tokio::test]
async fn test_quarantine_policy_sets_batch_aside() {
    let ctx = TestContext::with_config(CycleConfig {
        poison_policy: PoisonPolicy::Quarantine { after_attempts: 2 },
        ..fast_cycle_config()
    });
    ctx.source.push_all([
        fixtures::transaction("ok", 1.0),
        fixtures::with_null(fixtures::transaction("bad", 1.0), "user_id"),
    ]);

    let first = ctx.controller.run_once().await;
    assert_eq!(first.failure_class(), Some(FailureClass::Validation));
    assert_eq!(ctx.source.committed(), 0);

    let second = ctx.controller.run_once().await;
    match &second.outcome {
        CycleOutcome::Quarantined { reason } => assert!(reason.contains("VALID_001")),
        other => panic!("expected quarantine, got {:?}", other),
    }
    assert!(second.acknowledged);
    assert_eq!(ctx.source.committed(), 2);

    let rejected = ctx.store.rejected_batches();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].batch_key, "memory@0");
    assert_eq!(rejected[0].payloads.as_array().map(Vec::len), Some(2));
    assert!(ctx.store.curated_rows().is_empty());

    // The pipeline progresses past the poison batch
    ctx.source.push(fixtures::transaction("next", 3.0));
    let third = ctx.controller.run_once().await;
    assert!(third.is_success());
    assert!(ctx.store.curated("next").is_some());
}

/// A source failure is transient: nothing written, nothing committed, next cycle recovers
#[tokio::test]
async fn test_source_failure_is_retried() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 3));
    ctx.source.set_should_fail(true);

    let report = ctx.controller.run_once().await;
    let (class, code, _) = failure(&report.outcome);
    assert_eq!(class, FailureClass::TransientSource);
    assert_eq!(code, Some("SRC_001"));
    assert_eq!(report.batch_size, 0);
    assert_eq!(report.window, None);

    ctx.source.set_should_fail(false);
    let report = ctx.controller.run_once().await;
    assert!(report.is_success());
    assert_eq!(ctx.store.curated_rows().len(), 3);
}

/// A curated write failure after a successful raw write: no commit, redelivery converges
#[tokio::test]
async fn test_store_failure_then_redelivery_converges() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 10));
    ctx.store.set_fail_curated(true);

    let report = ctx.controller.run_once().await;
    let (class, code, _) = failure(&report.outcome);
    assert_eq!(class, FailureClass::StoreWrite);
    assert_eq!(code, Some("DB_001"));
    assert!(!report.acknowledged);
    assert_eq!(ctx.source.committed(), 0);
    assert_eq!(ctx.store.raw_rows().len(), 10);
    assert!(ctx.store.curated_rows().is_empty());

    ctx.store.set_fail_curated(false);
    let report = ctx.controller.run_once().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Committed {
            raw_written: 10,
            curated_written: 10
        }
    );
    assert_eq!(ctx.store.raw_rows().len(), 10);
    assert_eq!(ctx.store.curated_rows().len(), 10);
    assert_eq!(ctx.source.committed(), 10);
}

/// A raw write failure stops the cycle before the curated write
#[tokio::test]
async fn test_raw_failure_skips_curated_write() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 4));
    ctx.store.set_fail_raw(true);

    let report = ctx.controller.run_once().await;
    assert_eq!(report.failure_class(), Some(FailureClass::StoreWrite));
    assert!(ctx.store.curated_rows().is_empty());
    assert_eq!(ctx.source.commit_count(), 0);
}

/// Store writes are time-bounded
#[tokio::test]
async fn test_slow_write_times_out() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 2));
    ctx.store.set_write_delay(Some(Duration::from_secs(3)));

    let report = ctx.controller.run_once().await;
    let (class, code, reason) = failure(&report.outcome);
    assert_eq!(class, FailureClass::StoreWrite);
    assert_eq!(code, Some("TIME_001"));
    assert!(reason.contains("raw_transactions"), "reason: {}", reason);
    assert_eq!(ctx.source.committed(), 0);
}

/// Fetch is time-bounded too
#[tokio::test]
async fn test_stuck_fetch_times_out() {
    let ctx = TestContext::new();
    ctx.source.set_fetch_delay(Some(Duration::from_secs(10)));

    let report = ctx.controller.run_once().await;
    let (class, code, _) = failure(&report.outcome);
    assert_eq!(class, FailureClass::TransientSource);
    assert_eq!(code, Some("TIME_001"));
}

/// Only one cycle runs at a time; a concurrent call is turned away without fetching
#[tokio::test]
async fn test_concurrent_cycle_is_rejected() {
    let ctx = TestContext::new();
    ctx.source.push_all(fixtures::transactions("tx", 2));
    ctx.store.set_write_delay(Some(Duration::from_millis(200)));

    let controller = ctx.controller.clone();
    let running = tokio::spawn(async move { controller.run_once().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let busy = ctx.controller.run_once().await;
    assert_eq!(busy.failure_class(), Some(FailureClass::Busy));
    assert_eq!(ctx.source.fetch_count(), 1);

    let finished = running.await.unwrap();
    assert!(finished.is_success());
    assert_eq!(ctx.source.committed(), 2);
}

/// An empty poll is acknowledged and leaves the store alone
#[tokio::test]
async fn test_empty_poll_is_a_noop() {
    let ctx = TestContext::new();

    let report = ctx.controller.run_once().await;
    assert_eq!(report.outcome, CycleOutcome::Empty);
    assert!(report.acknowledged);
    assert_eq!(report.final_state, CycleState::Idle);
    assert!(ctx.store.raw_rows().is_empty());
}
