use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted state of one checkpoint record.
///
/// Serialized as a flat JSON object mapping sub-key to an ISO-8601 timestamp:
///
/// ```json
/// {"works_last_check": "2024-03-01T10:15:00.123456+00:00"}
/// ```
pub type StateDocument = BTreeMap<String, String>;

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Raw persistence for state documents, one per record name.
///
/// Implementations do not need to be atomic across concurrent writers of the
/// same record; the per-stream lease serializes writers.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the document for `record`. A missing record is an empty document.
    async fn retrieve(&self, record: &str) -> Result<StateDocument>;

    /// Replace the document for `record`.
    async fn save(&self, record: &str, state: &StateDocument) -> Result<()>;

    /// Remove the document for `record` entirely.
    async fn clear(&self, record: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Checkpoint Store
// ═══════════════════════════════════════════════════════════════════════════

/// Durable `record → sub-key → last processed modified` mapping.
#[derive(Clone)]
pub struct CheckpointStore {
    backend: Arc<dyn StateBackend>,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Last checkpoint written for `key` in `record`, if any.
    pub async fn get(&self, record: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let state = self.backend.retrieve(record).await?;
        state.get(key).map(|raw| parse_timestamp(raw)).transpose()
    }

    /// Read-modify-write `key` in `record` to `value`.
    ///
    /// The stored value never moves backwards: if the record already holds a
    /// later timestamp it is kept. Returns the value now stored.
    pub async fn set(
        &self,
        record: &str,
        key: &str,
        value: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut state = self.backend.retrieve(record).await?;

        if let Some(current) = state.get(key).map(|raw| parse_timestamp(raw)).transpose()? {
            if current >= value {
                debug!(record, key, %current, offered = %value, "checkpoint not advanced");
                return Ok(current);
            }
        }

        state.insert(key.to_string(), format_timestamp(value));
        self.backend.save(record, &state).await?;
        Ok(value)
    }

    /// All sub-keys stored for `record`.
    pub async fn snapshot(&self, record: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let state = self.backend.retrieve(record).await?;
        state
            .iter()
            .map(|(key, raw)| Ok((key.clone(), parse_timestamp(raw)?)))
            .collect()
    }

    /// Drop one sub-key, or the whole record when `key` is `None`.
    pub async fn reset(&self, record: &str, key: Option<&str>) -> Result<()> {
        match key {
            None => self.backend.clear(record).await,
            Some(key) => {
                let mut state = self.backend.retrieve(record).await?;
                if state.remove(key).is_some() {
                    self.backend.save(record, &state).await?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
