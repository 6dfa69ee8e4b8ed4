use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    CategoryAggregate, CategoryDocument, CategoryRow, ContributorAggregate, ContributorDocument,
    ContributorRow, ContributorWork, IndexDocument, RawBatch, RawRecord, ValidationError,
    ValidationPolicy, WorkCategoriesPatch, WorkCategoriesRow, WorkContributorsPatch,
    WorkContributorsRow, WorkDocument, WorkRow, MAX_RATING,
};
use crate::stream::SourceQuery;

/// Transformed batch ready for upload.
#[derive(Debug, Clone, Default)]
pub struct DocumentBatch {
    pub documents: Vec<IndexDocument>,
    /// Rows dropped under `ValidationPolicy::SkipRecord`
    pub skipped: Vec<ValidationError>,
    /// Cursor of the whole raw batch, skipped rows included
    pub max_modified: Option<DateTime<Utc>>,
}

/// Validates raw rows and shapes them into index documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    policy: ValidationPolicy,
}

impl Transformer {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Transform every row of `batch`.
    ///
    /// Under `AbortBatch` the first invalid row fails the call. Under
    /// `SkipRecord` invalid rows are logged and reported in `skipped`.
    pub fn transform(&self, batch: &RawBatch) -> Result<DocumentBatch, ValidationError> {
        let mut out = DocumentBatch {
            documents: Vec::with_capacity(batch.len()),
            skipped: Vec::new(),
            max_modified: batch.max_modified(),
        };

        for record in &batch.records {
            match transform_record(batch.query, record) {
                Ok(doc) => out.documents.push(doc),
                Err(err) => match self.policy {
                    ValidationPolicy::AbortBatch => return Err(err),
                    ValidationPolicy::SkipRecord => {
                        warn!(query = %batch.query, id = ?err.id, "skipping record: {}", err.reason);
                        out.skipped.push(err);
                    }
                },
            }
        }

        Ok(out)
    }
}

/// Transform one row. Pure: the same row always yields the same document.
pub fn transform_record(
    query: SourceQuery,
    record: &RawRecord,
) -> Result<IndexDocument, ValidationError> {
    match query {
        SourceQuery::Works => {
            let row: WorkRow = parse_row(query, record)?;
            let doc = work_document(query, row)?;
            to_index_document(query, doc.id, &doc)
        }
        SourceQuery::WorkCategories => {
            let row: WorkCategoriesRow = parse_row(query, record)?;
            check_names(query, row.id, "genres", &row.genres)?;
            let doc = WorkCategoriesPatch {
                id: row.id,
                categories: CategoryAggregate::from_names(row.genres),
            };
            to_index_document(query, doc.id, &doc)
        }
        SourceQuery::WorkContributors => {
            let row: WorkContributorsRow = parse_row(query, record)?;
            check_contributors(query, row.id, &row)?;
            let doc = WorkContributorsPatch {
                id: row.id,
                contributors: ContributorAggregate::from_roles(row.contributors),
            };
            to_index_document(query, doc.id, &doc)
        }
        SourceQuery::Categories => {
            let row: CategoryRow = parse_row(query, record)?;
            let name = non_blank(query, row.id, "name", row.name)?;
            let doc = CategoryDocument { id: row.id, name };
            to_index_document(query, doc.id, &doc)
        }
        SourceQuery::Contributors => {
            let row: ContributorRow = parse_row(query, record)?;
            let doc = contributor_document(query, row)?;
            to_index_document(query, doc.id, &doc)
        }
    }
}

fn parse_row<T: DeserializeOwned>(
    query: SourceQuery,
    record: &RawRecord,
) -> Result<T, ValidationError> {
    T::deserialize(&record.payload).map_err(|e| {
        let id = record.payload.get("id").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        ValidationError::new(query, id, e.to_string())
    })
}

fn work_document(query: SourceQuery, row: WorkRow) -> Result<WorkDocument, ValidationError> {
    let title = match row.title {
        Some(title) => non_blank(query, row.id, "title", title)?,
        None => return Err(invalid(query, row.id, "title is missing")),
    };

    if let Some(rating) = row.rating {
        if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
            return Err(invalid(
                query,
                row.id,
                format!("rating {} outside 0..={}", rating, MAX_RATING),
            ));
        }
    }

    check_names(query, row.id, "genres", &row.genres)?;
    let contributors = &row.contributors;
    for (role, refs) in [
        ("actors", &contributors.actors),
        ("writers", &contributors.writers),
        ("directors", &contributors.directors),
    ] {
        if refs.iter().any(|r| r.name.trim().is_empty()) {
            return Err(invalid(query, row.id, format!("blank name in {}", role)));
        }
    }

    Ok(WorkDocument {
        id: row.id,
        title,
        description: row.description,
        imdb_rating: row.rating,
        permissions: row.permissions,
        categories: CategoryAggregate::from_names(row.genres),
        contributors: ContributorAggregate::from_roles(row.contributors),
    })
}

fn contributor_document(
    query: SourceQuery,
    row: ContributorRow,
) -> Result<ContributorDocument, ValidationError> {
    let full_name = non_blank(query, row.id, "full_name", row.full_name)?;

    let mut films: Vec<ContributorWork> = row
        .films
        .into_iter()
        .map(|film| {
            let mut roles = film.roles;
            roles.sort();
            roles.dedup();
            ContributorWork { id: film.id, roles }
        })
        .collect();
    films.sort_by_key(|film| film.id);

    if let Some(film) = films.iter().find(|film| film.roles.is_empty()) {
        return Err(invalid(query, row.id, format!("no roles for work {}", film.id)));
    }

    Ok(ContributorDocument {
        id: row.id,
        full_name,
        films,
    })
}

fn check_contributors(
    query: SourceQuery,
    id: Uuid,
    row: &WorkContributorsRow,
) -> Result<(), ValidationError> {
    let lists = &row.contributors;
    if lists
        .actors
        .iter()
        .chain(&lists.writers)
        .chain(&lists.directors)
        .any(|r| r.name.trim().is_empty())
    {
        return Err(invalid(query, id, "blank contributor name"));
    }
    Ok(())
}

fn check_names(
    query: SourceQuery,
    id: Uuid,
    field: &str,
    names: &[String],
) -> Result<(), ValidationError> {
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(invalid(query, id, format!("blank entry in {}", field)));
    }
    Ok(())
}

fn non_blank(
    query: SourceQuery,
    id: Uuid,
    field: &str,
    value: String,
) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(invalid(query, id, format!("{} is blank", field)));
    }
    Ok(value)
}

fn invalid(query: SourceQuery, id: Uuid, reason: impl Into<String>) -> ValidationError {
    ValidationError::new(query, Some(id.to_string()), reason)
}

fn to_index_document<T: Serialize>(
    query: SourceQuery,
    id: Uuid,
    doc: &T,
) -> Result<IndexDocument, ValidationError> {
    let body = serde_json::to_value(doc).map_err(|e| invalid(query, id, e.to_string()))?;
    Ok(IndexDocument { id, body })
}
