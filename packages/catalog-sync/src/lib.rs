/*
 * Catalog Sync - incremental PostgreSQL → Elasticsearch sync
 *
 * Keeps the search indices of the film catalog in step with the system of
 * record, one independently triggered stream per index.
 *
 * Architecture:
 * - Extraction (server-side cursor, `modified`-ordered batches)
 * - Transformation (validated, fully recomputed aggregates)
 * - Bulk upsert (update + doc_as_upsert, all-or-nothing per batch)
 * - Checkpoints and fenced leases (catalog-state, Redis)
 * - Run state machine with a per-run report
 */

pub mod clients;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod run;
pub mod stream;
pub mod transform;

// Re-exports
pub use clients::Clients;
pub use config::{ConfigError, SyncConfig};
pub use error::{ErrorCategory, Result, SyncError};
pub use extract::{BatchStream, Extractor, MemoryExtractor, PostgresExtractor};
pub use index::{BulkResponse, ElasticIndex, InMemoryIndex, SearchIndex, Uploader};
pub use metrics::SyncMetrics;
pub use models::{IndexDocument, RawBatch, RawRecord, ValidationError, ValidationPolicy};
pub use orchestrator::{StreamStatus, SyncOrchestrator, SyncSettings};
pub use run::{AbortReason, QueryReport, RunOutcome, RunReport, RunState, RunStateMachine};
pub use stream::{SourceQuery, StreamId};
pub use transform::{DocumentBatch, Transformer};
