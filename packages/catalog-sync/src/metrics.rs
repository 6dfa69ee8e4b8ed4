//! Prometheus counters for sync runs (`metrics` feature)
//!
//! Without the feature every method is a no-op, so callers never need
//! `cfg` attributes of their own.

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter_vec_with_registry, IntCounterVec, Opts, Registry};

use crate::run::{RunOutcome, RunReport};
use crate::stream::{SourceQuery, StreamId};

#[cfg(feature = "metrics")]
#[derive(Clone)]
struct Counters {
    runs: IntCounterVec,
    batches: IntCounterVec,
    upserted: IntCounterVec,
    skipped: IntCounterVec,
}

#[derive(Clone, Default)]
pub struct SyncMetrics {
    #[cfg(feature = "metrics")]
    counters: Option<Counters>,
}

impl SyncMetrics {
    pub fn disabled() -> Self {
        Self::default()
    }

    #[cfg(feature = "metrics")]
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counters = Counters {
            runs: register_int_counter_vec_with_registry!(
                Opts::new("catalog_sync_runs_total", "Sync runs by terminal outcome"),
                &["stream", "outcome"],
                registry
            )?,
            batches: register_int_counter_vec_with_registry!(
                Opts::new("catalog_sync_batches_total", "Batches written and checkpointed"),
                &["stream", "query"],
                registry
            )?,
            upserted: register_int_counter_vec_with_registry!(
                Opts::new("catalog_sync_documents_upserted_total", "Documents upserted"),
                &["stream", "query"],
                registry
            )?,
            skipped: register_int_counter_vec_with_registry!(
                Opts::new("catalog_sync_records_skipped_total", "Records dropped by validation"),
                &["stream", "query"],
                registry
            )?,
        };
        Ok(Self {
            counters: Some(counters),
        })
    }

    pub fn batch_written(&self, stream: StreamId, query: SourceQuery, upserted: usize, skipped: usize) {
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.counters {
            let labels = [stream.as_str(), query.as_str()];
            c.batches.with_label_values(&labels).inc();
            c.upserted.with_label_values(&labels).inc_by(upserted as u64);
            c.skipped.with_label_values(&labels).inc_by(skipped as u64);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (stream, query, upserted, skipped);
    }

    pub fn run_finished(&self, report: &RunReport) {
        let outcome = match &report.outcome {
            RunOutcome::Success => "success",
            RunOutcome::Aborted(reason) if reason.is_error() => "failed",
            RunOutcome::Aborted(_) => "skipped",
        };
        #[cfg(feature = "metrics")]
        if let Some(c) = &self.counters {
            c.runs
                .with_label_values(&[report.stream.as_str(), outcome])
                .inc();
        }
        #[cfg(not(feature = "metrics"))]
        let _ = outcome;
    }
}
