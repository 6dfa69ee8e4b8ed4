//! Source rows and index documents
//!
//! Rows are what the extraction queries project (minus the `modified`
//! cursor). Documents are what the read side consumes. Aggregates are always
//! rebuilt from the full lists in the row, never patched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::stream::SourceQuery;

/// Highest accepted `imdb_rating`.
pub const MAX_RATING: f64 = 100.0;

// ═══════════════════════════════════════════════════════════════════════════
// Extraction output
// ═══════════════════════════════════════════════════════════════════════════

/// One extracted row: its cursor plus the untyped payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub modified: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Rows from one query page, in `modified` ascending order.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub query: SourceQuery,
    pub records: Vec<RawRecord>,
}

impl RawBatch {
    pub fn new(query: SourceQuery, records: Vec<RawRecord>) -> Self {
        Self { query, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newest cursor value in the batch.
    pub fn max_modified(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.modified).max()
    }

    /// Newest cursor value strictly below [`RawBatch::max_modified`].
    ///
    /// Rows tied with the newest value may continue in the next page, so
    /// while the stream is open only this value is safe to checkpoint.
    pub fn settled_modified(&self) -> Option<DateTime<Utc>> {
        let newest = self.max_modified()?;
        self.records
            .iter()
            .map(|r| r.modified)
            .filter(|modified| *modified < newest)
            .max()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════════

/// A row that could not be turned into a document.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("invalid {query} record {}: {reason}", .id.as_deref().unwrap_or("<no id>"))]
pub struct ValidationError {
    pub query: SourceQuery,
    pub id: Option<String>,
    pub reason: String,
}

impl ValidationError {
    pub fn new(query: SourceQuery, id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            query,
            id,
            reason: reason.into(),
        }
    }
}

/// What to do with a row that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Fail the batch; the checkpoint stays before it
    #[default]
    AbortBatch,
    /// Log and drop the row; the rest of the batch is written
    SkipRecord,
}

impl std::str::FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort_batch" => Ok(ValidationPolicy::AbortBatch),
            "skip_record" => Ok(ValidationPolicy::SkipRecord),
            other => Err(format!(
                "unknown validation policy '{}' (expected abort_batch or skip_record)",
                other
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Enumerations
// ═══════════════════════════════════════════════════════════════════════════

/// Access-control tag required to read a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Actor,
    Writer,
    Director,
}

// ═══════════════════════════════════════════════════════════════════════════
// Source rows
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContributorRef {
    pub id: Uuid,
    pub name: String,
}

/// `works` query row.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkRow {
    pub id: Uuid,
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub permissions: Option<Permission>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(flatten)]
    pub contributors: RoleLists,
}

/// `work_categories` query row.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkCategoriesRow {
    pub id: Uuid,
    pub genres: Vec<String>,
}

/// `work_contributors` query row.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkContributorsRow {
    pub id: Uuid,
    #[serde(flatten)]
    pub contributors: RoleLists,
}

/// Contributors of one work grouped by role.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleLists {
    #[serde(default)]
    pub actors: Vec<ContributorRef>,
    #[serde(default)]
    pub writers: Vec<ContributorRef>,
    #[serde(default)]
    pub directors: Vec<ContributorRef>,
}

/// `categories` query row.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRow {
    pub id: Uuid,
    pub name: String,
}

/// `contributors` query row.
#[derive(Debug, Clone, Deserialize)]
pub struct ContributorRow {
    pub id: Uuid,
    pub full_name: String,
    #[serde(default)]
    pub films: Vec<ContributorWorkRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributorWorkRow {
    pub id: Uuid,
    pub roles: Vec<Role>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Index documents
// ═══════════════════════════════════════════════════════════════════════════

/// Category names of a work, sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAggregate {
    pub genres: Vec<String>,
}

impl CategoryAggregate {
    pub fn from_names(mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        Self { genres: names }
    }
}

/// Role-grouped contributors of a work with the derived name lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorAggregate {
    pub actors: Vec<ContributorRef>,
    pub writers: Vec<ContributorRef>,
    pub directors: Vec<ContributorRef>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub directors_names: Vec<String>,
}

impl ContributorAggregate {
    pub fn from_roles(lists: RoleLists) -> Self {
        let actors = normalize_refs(lists.actors);
        let writers = normalize_refs(lists.writers);
        let directors = normalize_refs(lists.directors);
        Self {
            actors_names: names_of(&actors),
            writers_names: names_of(&writers),
            directors_names: names_of(&directors),
            actors,
            writers,
            directors,
        }
    }
}

fn normalize_refs(mut refs: Vec<ContributorRef>) -> Vec<ContributorRef> {
    refs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    refs.dedup();
    refs
}

fn names_of(refs: &[ContributorRef]) -> Vec<String> {
    refs.iter().map(|r| r.name.clone()).collect()
}

/// Full work document, written by the `works` query.
///
/// Nullable columns serialize as `null` so a value cleared at the source is
/// cleared in the index too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkDocument {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    pub permissions: Option<Permission>,
    #[serde(flatten)]
    pub categories: CategoryAggregate,
    #[serde(flatten)]
    pub contributors: ContributorAggregate,
}

/// Partial work document carrying only the category aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkCategoriesPatch {
    pub id: Uuid,
    #[serde(flatten)]
    pub categories: CategoryAggregate,
}

/// Partial work document carrying only the contributor aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkContributorsPatch {
    pub id: Uuid,
    #[serde(flatten)]
    pub contributors: ContributorAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDocument {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorDocument {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub full_name: String,
    pub films: Vec<ContributorWork>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorWork {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub roles: Vec<Role>,
}

/// Document ready for a bulk upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: Uuid,
    pub body: serde_json::Value,
}
