use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;
use tracing::debug;

use super::{queries, BatchStream, Extractor};
use crate::error::Result;
use crate::models::{RawBatch, RawRecord};
use crate::stream::SourceQuery;

/// Reads source queries through a server-side cursor.
///
/// Each stream owns one read-only transaction for its lifetime. Dropping the
/// stream early rolls the transaction back, which also closes the cursor.
#[derive(Clone)]
pub struct PostgresExtractor {
    pool: PgPool,
}

impl PostgresExtractor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for PostgresExtractor {
    async fn open(
        &self,
        query: SourceQuery,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchStream>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;

        let declare = queries::declare_cursor(query);
        sqlx::query(&declare)
            .persistent(false)
            .bind(since)
            .execute(&mut *tx)
            .await?;

        debug!(query = %query, since = ?since, batch_size, "cursor opened");

        Ok(Box::new(PostgresBatchStream {
            tx: Some(tx),
            query,
            batch_size,
            fetch: queries::fetch_forward(batch_size),
        }))
    }
}

struct PostgresBatchStream {
    tx: Option<Transaction<'static, Postgres>>,
    query: SourceQuery,
    batch_size: usize,
    fetch: String,
}

impl PostgresBatchStream {
    async fn finish(&mut self) -> Result<()> {
        if let Some(mut tx) = self.tx.take() {
            sqlx::query(&queries::close_cursor())
                .persistent(false)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!(query = %self.query, "cursor exhausted");
        }
        Ok(())
    }
}

#[async_trait]
impl BatchStream for PostgresBatchStream {
    async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        let Some(tx) = self.tx.as_mut() else {
            return Ok(None);
        };

        let rows: Vec<(DateTime<Utc>, serde_json::Value)> = sqlx::query_as(&self.fetch)
            .persistent(false)
            .fetch_all(&mut **tx)
            .await?;

        let exhausted = rows.len() < self.batch_size;
        if exhausted {
            self.finish().await?;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let records = rows
            .into_iter()
            .map(|(modified, payload)| RawRecord { modified, payload })
            .collect();
        Ok(Some(RawBatch::new(self.query, records)))
    }
}
