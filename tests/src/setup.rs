//! Common test setup functions.

use queue::{FileQueue, FileQueueConfig, RecordSource};
use std::sync::Arc;
use store::{StoreClient, TransactionStore};
use worker::{CycleConfig, CycleController, PoisonPolicy};

use crate::mocks::{MemorySource, MemoryStore};

/// Cycle settings that keep tests fast.
pub fn fast_cycle_config() -> CycleConfig {
    CycleConfig {
        batch_size: 500,
        poll_timeout_ms: 20,
        write_timeout_secs: 1,
        poison_policy: PoisonPolicy::Retry,
    }
}

/// Controller wired to in-memory source and store.
pub struct TestContext {
    pub source: MemorySource,
    pub store: MemoryStore,
    pub controller: Arc<CycleController>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(fast_cycle_config())
    }

    pub fn with_config(config: CycleConfig) -> Self {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let controller = Arc::new(CycleController::new(
            Arc::new(source.clone()) as Arc<dyn RecordSource>,
            Arc::new(store.clone()) as Arc<dyn TransactionStore>,
            config,
        ));

        Self {
            source,
            store,
            controller,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller wired to a JSONL file queue and an in-memory SQLite store.
pub struct SqliteContext {
    pub dir: tempfile::TempDir,
    pub queue_config: FileQueueConfig,
    pub store: Arc<StoreClient>,
    pub controller: Arc<CycleController>,
}

impl SqliteContext {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let queue_config = FileQueueConfig {
            poll_interval_ms: 5,
            ..FileQueueConfig::new(dir.path().join("transactions.jsonl"))
        };

        let store = Arc::new(
            StoreClient::in_memory()
                .await
                .expect("Failed to open in-memory store"),
        );
        store::health::init_schema(&store)
            .await
            .expect("Failed to initialize schema");

        let controller = Self::controller_for(&queue_config, &store);
        Self {
            dir,
            queue_config,
            store,
            controller,
        }
    }

    /// A fresh controller over the same queue file and store, as after a restart.
    pub fn restart(&mut self) {
        self.controller = Self::controller_for(&self.queue_config, &self.store);
    }

    fn controller_for(queue_config: &FileQueueConfig, store: &Arc<StoreClient>) -> Arc<CycleController> {
        Arc::new(CycleController::new(
            Arc::new(FileQueue::new(queue_config.clone())),
            store.clone(),
            fast_cycle_config(),
        ))
    }
}
