//! Extraction: paged, `modified`-ordered reads from the system of record
//!
//! An [`Extractor`] opens one [`BatchStream`] per source query. A stream is
//! lazy, finite and not restartable; every batch it yields is sorted by
//! `modified` ascending and contains only rows newer than `since`.

pub mod memory;
pub mod postgres;
pub mod queries;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::RawBatch;
use crate::stream::SourceQuery;

pub use memory::MemoryExtractor;
pub use postgres::PostgresExtractor;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Start reading `query` from `since` (exclusive); `None` reads everything.
    async fn open(
        &self,
        query: SourceQuery,
        since: Option<DateTime<Utc>>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchStream>>;
}

#[async_trait]
pub trait BatchStream: Send {
    /// Next page, or `None` once the query is exhausted.
    ///
    /// A connectivity error ends the stream; it is not retried here.
    async fn next_batch(&mut self) -> Result<Option<RawBatch>>;
}
