use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Independently scheduled sync pipeline, one per index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Works,
    Categories,
    Contributors,
}

impl StreamId {
    pub const ALL: [StreamId; 3] = [StreamId::Works, StreamId::Categories, StreamId::Contributors];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamId::Works => "works",
            StreamId::Categories => "categories",
            StreamId::Contributors => "contributors",
        }
    }

    /// Lease key guarding this stream (`<stream>_lock`).
    pub fn lock_key(&self) -> String {
        format!("{}_lock", self.as_str())
    }

    /// Checkpoint record holding this stream's sub-keys (`<stream>_sync`).
    pub fn state_record(&self) -> String {
        format!("{}_sync", self.as_str())
    }

    /// Source queries feeding this stream's index, in execution order.
    pub fn queries(&self) -> &'static [SourceQuery] {
        match self {
            StreamId::Works => &[
                SourceQuery::Works,
                SourceQuery::WorkCategories,
                SourceQuery::WorkContributors,
            ],
            StreamId::Categories => &[SourceQuery::Categories],
            StreamId::Contributors => &[SourceQuery::Contributors],
        }
    }
}

impl FromStr for StreamId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "works" => Ok(StreamId::Works),
            "categories" => Ok(StreamId::Categories),
            "contributors" => Ok(StreamId::Contributors),
            _ => Err(SyncError::UnknownStream(s.to_string())),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One extraction query. Each has its own checkpoint sub-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceQuery {
    /// Works changed directly, with all aggregates
    Works,
    /// Works whose linked categories changed
    WorkCategories,
    /// Works whose linked contributors changed
    WorkContributors,
    /// Categories linked to at least one work
    Categories,
    /// Contributors with their works and roles
    Contributors,
}

impl SourceQuery {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceQuery::Works => "works",
            SourceQuery::WorkCategories => "work_categories",
            SourceQuery::WorkContributors => "work_contributors",
            SourceQuery::Categories => "categories",
            SourceQuery::Contributors => "contributors",
        }
    }

    /// Sub-key inside the stream's checkpoint record.
    ///
    /// Keyed by the table whose `modified` drives the query, so `works` and
    /// `categories` streams both use `categories_last_check` in their own
    /// records.
    pub fn checkpoint_key(&self) -> &'static str {
        match self {
            SourceQuery::Works => "works_last_check",
            SourceQuery::WorkCategories | SourceQuery::Categories => "categories_last_check",
            SourceQuery::WorkContributors | SourceQuery::Contributors => "contributors_last_check",
        }
    }
}

impl std::fmt::Display for SourceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stream_id_roundtrip() {
        for stream in StreamId::ALL {
            let parsed: StreamId = stream.as_str().parse().unwrap();
            assert_eq!(stream, parsed);
        }
        assert!("movies".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(StreamId::Works.lock_key(), "works_lock");
        assert_eq!(StreamId::Contributors.state_record(), "contributors_sync");
    }

    #[test]
    fn test_checkpoint_keys_unique_within_stream() {
        for stream in StreamId::ALL {
            let keys: HashSet<_> = stream.queries().iter().map(|q| q.checkpoint_key()).collect();
            assert_eq!(keys.len(), stream.queries().len(), "{stream}");
        }
    }

    #[test]
    fn test_works_stream_runs_direct_query_first() {
        assert_eq!(StreamId::Works.queries()[0], SourceQuery::Works);
    }
}
