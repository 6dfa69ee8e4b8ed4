use catalog_state::{CheckpointStore, LeaseGuard, LockManager};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{IndexNames, SyncConfig};
use crate::error::{Result, SyncError};
use crate::extract::Extractor;
use crate::index::{SearchIndex, Uploader};
use crate::metrics::SyncMetrics;
use crate::run::{AbortReason, QueryReport, RunOutcome, RunReport, RunStateMachine};
use crate::stream::{SourceQuery, StreamId};
use crate::transform::Transformer;

/// Knobs the orchestrator reads from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub lock_ttl: Duration,
    pub indices: IndexNames,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.sync.batch_size,
            lock_ttl: config.sync.lock_ttl(),
            indices: config.elastic.indices.clone(),
        }
    }
}

/// Checkpoints of one stream, for `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub stream: StreamId,
    pub index: String,
    pub lock_key: String,
    pub state_record: String,
    pub checkpoints: BTreeMap<String, DateTime<Utc>>,
}

/// Runs one stream end to end: index check, lease, then every source query
/// batch by batch, renewing the lease before each checkpoint write.
pub struct SyncOrchestrator {
    extractor: Arc<dyn Extractor>,
    uploader: Uploader,
    checkpoints: CheckpointStore,
    locks: Arc<dyn LockManager>,
    transformer: Transformer,
    settings: SyncSettings,
    metrics: SyncMetrics,
}

impl SyncOrchestrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        index: Arc<dyn SearchIndex>,
        checkpoints: CheckpointStore,
        locks: Arc<dyn LockManager>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            extractor,
            uploader: Uploader::new(index, config.sync.retry_on_conflict),
            checkpoints,
            locks,
            transformer: Transformer::new(config.validation.policy),
            settings: SyncSettings::from(config),
            metrics: SyncMetrics::disabled(),
        }
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run every stream concurrently; each keeps its own lease and index.
    pub async fn run_many(&self, streams: &[StreamId]) -> Vec<Result<RunReport>> {
        join_all(streams.iter().map(|stream| self.run(*stream))).await
    }

    /// Execute one run of `stream`.
    ///
    /// Expected aborts (missing index, lease held elsewhere, mid-run failure)
    /// are reported in the returned [`RunReport`]. `Err` means the run itself
    /// was driven through an illegal state.
    pub async fn run(&self, stream: StreamId) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", stream = %stream, run_id = %run_id);
        self.execute(stream, run_id).instrument(span).await
    }

    async fn execute(&self, stream: StreamId, run_id: Uuid) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let index = self.settings.indices.for_stream(stream).to_string();
        let mut sm = RunStateMachine::new();
        let mut fence = None;
        let mut queries = Vec::new();

        // Transition: IDLE → INDEX_CHECKED (or straight to RELEASED)
        match self.uploader.ensure_index(&index).await {
            Ok(()) => sm.index_checked()?,
            Err(SyncError::IndexMissing(_)) => {
                warn!(index = %index, "target index does not exist, skipping run");
                sm.abort(AbortReason::IndexMissing {
                    index: index.clone(),
                })?;
            }
            Err(e) => {
                error!(index = %index, error = %e, "search index unreachable, skipping run");
                sm.abort(AbortReason::IndexUnreachable {
                    error: e.to_string(),
                })?;
            }
        }

        // Transition: INDEX_CHECKED → LOCK_ACQUIRED
        if !sm.state().is_terminal() {
            match self.locks.acquire(&stream.lock_key(), self.settings.lock_ttl).await {
                Ok(Some(lease)) => {
                    debug!(key = %lease.key, fence = lease.fence, "lease acquired");
                    fence = Some(lease.fence);
                    sm.lock_acquired(lease.fence)?;

                    let guard = LeaseGuard::new(Arc::clone(&self.locks), lease);
                    match self.process(stream, &index, &guard, &mut sm, &mut queries).await {
                        Ok(()) => sm.succeed()?,
                        Err(e) => {
                            error!(error = %e, category = %e.category(), "run aborted");
                            sm.abort(AbortReason::failed(&e))?;
                        }
                    }

                    // Any state → RELEASED: the lease goes back on every path
                    match guard.release().await {
                        Ok(true) => debug!("lease released"),
                        Ok(false) => warn!("lease was no longer held at release"),
                        Err(e) => warn!(error = %e, "lease release failed; it will expire"),
                    }
                }
                Ok(None) => {
                    info!(key = %stream.lock_key(), "previous run still holds the lease, skipping");
                    sm.abort(AbortReason::LockHeld)?;
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    error!(error = %e, "lease acquisition failed");
                    sm.abort(AbortReason::failed(&e))?;
                }
            }
        }

        let outcome = sm.outcome().cloned().ok_or_else(|| SyncError::InvalidStateTransition {
            from: sm.state().state_name().to_string(),
            to: "report".to_string(),
        })?;

        let report = RunReport {
            run_id,
            stream,
            index,
            fence,
            outcome,
            queries,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        self.metrics.run_finished(&report);
        match &report.outcome {
            RunOutcome::Success => info!(
                upserted = report.upserted(),
                skipped = report.skipped(),
                duration_ms = report.duration_ms,
                "run finished"
            ),
            RunOutcome::Aborted(reason) => info!(
                reason = ?reason,
                upserted = report.upserted(),
                duration_ms = report.duration_ms,
                "run aborted"
            ),
        }
        Ok(report)
    }

    async fn process(
        &self,
        stream: StreamId,
        index: &str,
        guard: &LeaseGuard,
        sm: &mut RunStateMachine,
        queries: &mut Vec<QueryReport>,
    ) -> Result<()> {
        let record = stream.state_record();

        for &query in stream.queries() {
            // Transition: LOCK_ACQUIRED | RUNNING → RUNNING (batch 0)
            let since = self.checkpoints.get(&record, query.checkpoint_key()).await?;
            sm.start_query(query)?;

            let mut report = QueryReport::new(query, since);
            let result = self
                .process_query(stream, query, index, &record, guard, sm, &mut report)
                .await;
            queries.push(report);
            result?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_query(
        &self,
        stream: StreamId,
        query: SourceQuery,
        index: &str,
        record: &str,
        guard: &LeaseGuard,
        sm: &mut RunStateMachine,
        report: &mut QueryReport,
    ) -> Result<()> {
        info!(query = %query, since = ?report.since, "extracting");
        let mut batches = self
            .extractor
            .open(query, report.since, self.settings.batch_size)
            .await?;

        // Newest cursor uploaded but not yet checkpointed
        let mut tail = None;

        while let Some(batch) = batches.next_batch().await? {
            let rows = batch.len();
            let settled = batch.settled_modified();
            let documents = self.transformer.transform(&batch)?;
            tail = tail.max(documents.max_modified);

            // A run that lost its lease must neither write nor move the checkpoint
            guard.renew(self.settings.lock_ttl).await?;
            let upserted = self.uploader.upload(index, &documents.documents).await?;
            guard.renew(self.settings.lock_ttl).await?;

            // Rows tied with the newest cursor may continue in the next page
            if let Some(settled) = settled {
                self.commit(record, query, settled, report).await?;
            }

            let skipped = documents.skipped.len();
            report.batches += 1;
            report.upserted += upserted;
            report.skipped += skipped;
            self.metrics.batch_written(stream, query, upserted, skipped);
            sm.batch_done()?;

            info!(
                query = %query,
                batch = report.batches,
                rows,
                upserted,
                skipped,
                checkpoint = ?report.checkpoint,
                "batch committed"
            );
        }

        // Exhausted: every row up to the last page's newest cursor is written
        if let Some(tail) = tail {
            guard.renew(self.settings.lock_ttl).await?;
            self.commit(record, query, tail, report).await?;
            debug!(query = %query, checkpoint = ?report.checkpoint, "query drained");
        }
        Ok(())
    }

    async fn commit(
        &self,
        record: &str,
        query: SourceQuery,
        value: DateTime<Utc>,
        report: &mut QueryReport,
    ) -> Result<()> {
        let stored = self
            .checkpoints
            .set(record, query.checkpoint_key(), value)
            .await?;
        report.checkpoint = Some(stored);
        Ok(())
    }

    /// Stored checkpoints of `stream`.
    pub async fn status(&self, stream: StreamId) -> Result<StreamStatus> {
        let state_record = stream.state_record();
        let checkpoints = self.checkpoints.snapshot(&state_record).await?;
        Ok(StreamStatus {
            stream,
            index: self.settings.indices.for_stream(stream).to_string(),
            lock_key: stream.lock_key(),
            state_record,
            checkpoints,
        })
    }

    /// Forget the checkpoint for `key` (or all of the stream's keys) so the
    /// next run re-extracts from the beginning.
    ///
    /// Takes the stream's lease for the duration; returns `false` without
    /// touching anything when a run currently holds it.
    pub async fn reset(&self, stream: StreamId, key: Option<&str>) -> Result<bool> {
        if let Some(key) = key {
            if !stream.queries().iter().any(|q| q.checkpoint_key() == key) {
                return Err(SyncError::UnknownCheckpointKey {
                    stream: stream.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let Some(lease) = self
            .locks
            .acquire(&stream.lock_key(), self.settings.lock_ttl)
            .await?
        else {
            return Ok(false);
        };
        let guard = LeaseGuard::new(Arc::clone(&self.locks), lease);

        let result = self.checkpoints.reset(&stream.state_record(), key).await;
        if let Err(e) = guard.release().await {
            warn!(stream = %stream, error = %e, "lease release after reset failed");
        }
        result?;

        info!(stream = %stream, key = ?key, "checkpoint reset");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::MemoryExtractor;
    use crate::index::InMemoryIndex;
    use catalog_state::{InMemoryLockManager, InMemoryStateBackend};
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        source: MemoryExtractor,
        index: InMemoryIndex,
        locks: InMemoryLockManager,
        checkpoints: CheckpointStore,
        orchestrator: SyncOrchestrator,
    }

    fn fixture() -> Fixture {
        let source = MemoryExtractor::new();
        let index = InMemoryIndex::with_indices(["movies", "genres", "persons"]);
        let locks = InMemoryLockManager::new();
        let checkpoints = CheckpointStore::new(Arc::new(InMemoryStateBackend::new()));
        let orchestrator = SyncOrchestrator::new(
            Arc::new(source.clone()),
            Arc::new(index.clone()),
            checkpoints.clone(),
            Arc::new(locks.clone()),
            &SyncConfig::default(),
        );
        Fixture {
            source,
            index,
            locks,
            checkpoints,
            orchestrator,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_source_succeeds_without_checkpoint() {
        let f = fixture();
        let report = f.orchestrator.run(StreamId::Works).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.queries.len(), 3);
        assert_eq!(report.fence, Some(1));
        assert!(f.checkpoints.snapshot("works_sync").await.unwrap().is_empty());
        assert!(!f.locks.is_held("works_lock"));
    }

    #[tokio::test]
    async fn test_categories_run_writes_and_checkpoints() {
        let f = fixture();
        let id = Uuid::from_u128(1);
        f.source.upsert(
            SourceQuery::Categories,
            ts(10),
            json!({"id": id, "name": "Drama", "modified": ts(10)}),
        );

        let report = f.orchestrator.run(StreamId::Categories).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.upserted(), 1);
        assert_eq!(
            f.index.document("genres", id),
            Some(json!({"uuid": id, "name": "Drama"}))
        );
        assert_eq!(
            f.checkpoints
                .get("categories_sync", "categories_last_check")
                .await
                .unwrap(),
            Some(ts(10))
        );
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let f = fixture();
        f.checkpoints
            .set("works_sync", "works_last_check", ts(5))
            .await
            .unwrap();

        let status = f.orchestrator.status(StreamId::Works).await.unwrap();
        assert_eq!(status.index, "movies");
        assert_eq!(status.checkpoints.get("works_last_check"), Some(&ts(5)));

        let err = f
            .orchestrator
            .reset(StreamId::Works, Some("genres_last_check"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownCheckpointKey { .. }));

        assert!(f
            .orchestrator
            .reset(StreamId::Works, Some("works_last_check"))
            .await
            .unwrap());
        assert!(f.orchestrator.status(StreamId::Works).await.unwrap().checkpoints.is_empty());
        assert!(!f.locks.is_held("works_lock"));
    }

    #[tokio::test]
    async fn test_reset_refuses_while_run_holds_lease() {
        let f = fixture();
        let _held = f
            .locks
            .acquire("works_lock", Duration::from_secs(15))
            .await
            .unwrap()
            .unwrap();
        f.checkpoints
            .set("works_sync", "works_last_check", ts(5))
            .await
            .unwrap();

        assert!(!f.orchestrator.reset(StreamId::Works, None).await.unwrap());
        assert_eq!(
            f.checkpoints.get("works_sync", "works_last_check").await.unwrap(),
            Some(ts(5))
        );
    }
}
