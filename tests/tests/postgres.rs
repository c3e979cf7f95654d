//! Store and cycle tests against a real PostgreSQL.
//!
//! Requires Docker (or `PIPELINE_TEST_POSTGRES_URL`), so these are ignored by default:
//! `cargo test -p integration-tests --test postgres -- --ignored`

use chrono::{Duration, Utc};
use integration_tests::{containers::TestContainers, fixtures, mocks::MemorySource};
use queue::RecordSource;
use std::sync::Arc;
use store::query::{count_rows, get_curated, Table};
use store::{StoreClient, TransactionStore};
use worker::{CycleController, CycleOutcome, QualityGate};

async fn fresh_store(containers: &TestContainers) -> StoreClient {
    let store = containers.store().await;
    store::health::init_schema(&store)
        .await
        .expect("Failed to initialize schema");

    if let store::StorePool::Postgres(pool) = store.pool() {
        sqlx_truncate(pool).await;
    }
    store
}

async fn sqlx_truncate(pool: &sqlx::PgPool) {
    sqlx::query("TRUNCATE raw_transactions, transactions_flat, rejected_batches")
        .execute(pool)
        .await
        .expect("Failed to truncate tables");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_cycle_is_idempotent() {
    let containers = TestContainers::start().await;
    let store = Arc::new(fresh_store(&containers).await);

    let source = MemorySource::with_messages(fixtures::transactions("pg", 50));
    let controller = CycleController::new(
        Arc::new(source.clone()) as Arc<dyn RecordSource>,
        store.clone() as Arc<dyn TransactionStore>,
        integration_tests::setup::fast_cycle_config(),
    );

    let report = controller.run_once().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Committed {
            raw_written: 50,
            curated_written: 50
        }
    );

    // Replay the same rows through a fresh cursor; raw rows are attempted but skipped
    let replay = MemorySource::with_messages(fixtures::transactions("pg", 50));
    let controller = CycleController::new(
        Arc::new(replay) as Arc<dyn RecordSource>,
        store.clone() as Arc<dyn TransactionStore>,
        integration_tests::setup::fast_cycle_config(),
    );
    let report = controller.run_once().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Committed {
            raw_written: 50,
            curated_written: 50
        }
    );

    assert_eq!(count_rows(&store, Table::Raw).await.unwrap(), 50);
    assert_eq!(count_rows(&store, Table::Curated).await.unwrap(), 50);

    let row = get_curated(&store, "pg-3").await.unwrap().unwrap();
    assert_eq!(row.amount, 27.5);
    assert_eq!(row.amount_bucket.as_str(), "20-100");

    let quality = QualityGate::check(store.as_ref(), Duration::hours(24))
        .await
        .unwrap();
    assert!(quality.passed(), "violations: {:?}", quality.violations);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_curated_upsert_overwrites() {
    let containers = TestContainers::start().await;
    let store = fresh_store(&containers).await;
    let now = Utc::now();

    let first = pipeline_core::transform_at(
        &batch(vec![fixtures::transaction("pg-upsert", 10.0)]),
        now,
    )
    .unwrap();
    let second = pipeline_core::transform_at(
        &batch(vec![fixtures::transaction("pg-upsert", 510.0)]),
        now,
    )
    .unwrap();

    store.write_curated(&first.curated).await.unwrap();
    store.write_curated(&second.curated).await.unwrap();

    let row = get_curated(&store, "pg-upsert").await.unwrap().unwrap();
    assert_eq!(row.amount, 510.0);
    assert_eq!(row.amount_bucket.as_str(), ">=500");
    assert_eq!(count_rows(&store, Table::Curated).await.unwrap(), 1);
}

fn batch(messages: Vec<serde_json::Value>) -> pipeline_core::Batch {
    let messages = messages
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match v {
            serde_json::Value::Object(payload) => {
                Some(pipeline_core::QueueMessage::new(i as i64, payload))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    let end = messages.len() as i64;
    pipeline_core::Batch::new("test", 0, end, messages)
}
