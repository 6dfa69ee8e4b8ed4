use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BatchStream, Extractor};
use crate::error::{Result, SyncError};
use crate::models::{RawBatch, RawRecord};
use crate::stream::SourceQuery;

#[derive(Default)]
struct Source {
    rows: HashMap<SourceQuery, Vec<RawRecord>>,
    /// Fail the n-th fetch (0-based) of the next stream opened for a query
    fail_at: HashMap<SourceQuery, usize>,
    opened: Vec<(SourceQuery, Option<DateTime<Utc>>)>,
}

/// In-memory source for tests and dry runs.
///
/// Rows are ordered by `(modified, id)` like the SQL queries, and each
/// stream works on a snapshot taken when it is opened.
#[derive(Clone, Default)]
pub struct MemoryExtractor {
    source: Arc<Mutex<Source>>,
}

impl MemoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a row (matched on the payload `id`).
    pub fn upsert(&self, query: SourceQuery, modified: DateTime<Utc>, payload: serde_json::Value) {
        let mut source = self.source.lock();
        let rows = source.rows.entry(query).or_default();
        let id = payload.get("id").cloned();
        rows.retain(|r| id.is_none() || r.payload.get("id") != id.as_ref());
        rows.push(RawRecord { modified, payload });
    }

    /// Make the stream opened next for `query` fail on fetch number `fetch`.
    pub fn fail_on_fetch(&self, query: SourceQuery, fetch: usize) {
        self.source.lock().fail_at.insert(query, fetch);
    }

    /// Every `open` call so far, in order.
    pub fn opened(&self) -> Vec<(SourceQuery, Option<DateTime<Utc>>)> {
        self.source.lock().opened.clone()
    }
}

#[async_trait]
impl Extractor for MemoryExtractor {
    async fn open(
        &self,
        query: SourceQuery,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchStream>> {
        let mut source = self.source.lock();
        source.opened.push((query, since));
        let fail_at = source.fail_at.remove(&query);

        let mut rows: Vec<RawRecord> = source
            .rows
            .get(&query)
            .map(|rows| {
                rows.iter()
                    .filter(|r| since.map_or(true, |since| r.modified > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| sort_id(&a.payload).cmp(&sort_id(&b.payload)))
        });

        Ok(Box::new(MemoryBatchStream {
            query,
            rows: rows.into_iter(),
            batch_size: batch_size.max(1),
            fetches: 0,
            fail_at,
        }))
    }
}

fn sort_id(payload: &serde_json::Value) -> String {
    payload
        .get("id")
        .map(|id| id.to_string())
        .unwrap_or_default()
}

struct MemoryBatchStream {
    query: SourceQuery,
    rows: std::vec::IntoIter<RawRecord>,
    batch_size: usize,
    fetches: usize,
    fail_at: Option<usize>,
}

#[async_trait]
impl BatchStream for MemoryBatchStream {
    async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        let fetch = self.fetches;
        self.fetches += 1;
        if self.fail_at == Some(fetch) {
            return Err(SyncError::Database(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "source connection reset",
            ))));
        }

        let records: Vec<RawRecord> = self.rows.by_ref().take(self.batch_size).collect();
        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(RawBatch::new(self.query, records)))
    }
}
