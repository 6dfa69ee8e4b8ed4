//! Shared fixture: orchestrator over in-memory adapters

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_state::{CheckpointStore, InMemoryLockManager, InMemoryStateBackend};
use catalog_sync::extract::{BatchStream, Extractor};
use catalog_sync::{
    InMemoryIndex, MemoryExtractor, Result, SourceQuery, SyncConfig, SyncOrchestrator,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub source: MemoryExtractor,
    pub index: InMemoryIndex,
    pub locks: InMemoryLockManager,
    pub state: InMemoryStateBackend,
    pub checkpoints: CheckpointStore,
}

impl Harness {
    pub fn new() -> Self {
        let state = InMemoryStateBackend::new();
        Self {
            source: MemoryExtractor::new(),
            index: InMemoryIndex::with_indices(["movies", "genres", "persons"]),
            locks: InMemoryLockManager::new(),
            checkpoints: CheckpointStore::new(Arc::new(state.clone())),
            state,
        }
    }

    pub fn orchestrator(&self, config: &SyncConfig) -> SyncOrchestrator {
        self.orchestrator_with(Arc::new(self.source.clone()), config)
    }

    pub fn orchestrator_with(
        &self,
        extractor: Arc<dyn Extractor>,
        config: &SyncConfig,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            extractor,
            Arc::new(self.index.clone()),
            self.checkpoints.clone(),
            Arc::new(self.locks.clone()),
            config,
        )
    }

    pub async fn checkpoint(&self, record: &str, key: &str) -> Option<DateTime<Utc>> {
        self.checkpoints.get(record, key).await.unwrap()
    }

    /// Category row at `ts(secs)`, id derived from `n`.
    pub fn category(&self, n: u128, secs: i64, name: &str) {
        self.source.upsert(
            SourceQuery::Categories,
            ts(secs),
            json!({"id": id(n), "name": name, "modified": ts(secs)}),
        );
    }
}

pub fn config_with_batch(batch_size: usize) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.sync.batch_size = batch_size;
    config
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Runs `before_open` the first time a stream is opened, then delegates.
pub struct HookedExtractor<F> {
    pub inner: MemoryExtractor,
    pub before_open: tokio::sync::Mutex<Option<F>>,
}

impl<F, Fut> HookedExtractor<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    pub fn new(inner: MemoryExtractor, before_open: F) -> Self {
        Self {
            inner,
            before_open: tokio::sync::Mutex::new(Some(before_open)),
        }
    }
}

#[async_trait]
impl<F, Fut> Extractor for HookedExtractor<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn open(
        &self,
        query: SourceQuery,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchStream>> {
        let hook = self.before_open.lock().await.take();
        if let Some(hook) = hook {
            hook().await;
        }
        self.inner.open(query, since, batch_size).await
    }
}
