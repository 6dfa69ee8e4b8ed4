//! Search index port and the bulk uploader
//!
//! The index is provisioned elsewhere; this crate only checks that it exists
//! and upserts documents into it.

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::IndexDocument;

pub use elastic::ElasticIndex;
pub use memory::InMemoryIndex;

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItem {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 200,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Rejections the index may accept on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 409 | 429) || self.status >= 500
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkResponse {
    /// Top-level `errors` flag of the response
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Response whose `errors` flag agrees with its items.
    pub fn new(items: Vec<BulkItem>) -> Self {
        Self {
            errors: items.iter().any(|item| !item.is_ok()),
            items,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|item| !item.is_ok())
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// One bulk call: update-with-upsert for every document.
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[IndexDocument],
        retry_on_conflict: u32,
    ) -> Result<BulkResponse>;
}

/// Writes document batches and refuses to report partial success.
#[derive(Clone)]
pub struct Uploader {
    index: Arc<dyn SearchIndex>,
    retry_on_conflict: u32,
}

impl Uploader {
    pub fn new(index: Arc<dyn SearchIndex>, retry_on_conflict: u32) -> Self {
        Self {
            index,
            retry_on_conflict,
        }
    }

    /// `Ok(())` only if the index exists; absence is `IndexMissing`.
    pub async fn ensure_index(&self, index: &str) -> Result<()> {
        if self.index.index_exists(index).await? {
            Ok(())
        } else {
            Err(SyncError::IndexMissing(index.to_string()))
        }
    }

    /// Upsert `documents` into `index`; returns how many were applied.
    ///
    /// Any rejected item fails the whole call with `PartialUpload`. A response
    /// that does not confirm every document fails with `UnconfirmedUpload`.
    pub async fn upload(&self, index: &str, documents: &[IndexDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let response = self
            .index
            .bulk_upsert(index, documents, self.retry_on_conflict)
            .await?;

        let failed: Vec<&BulkItem> = response.failed().collect();
        if let Some(first) = failed.first() {
            for item in &failed {
                warn!(index, id = %item.id, status = item.status, error = ?item.error, "bulk item rejected");
            }
            return Err(SyncError::PartialUpload {
                index: index.to_string(),
                failed: failed.len(),
                total: documents.len(),
                first_error: first
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("status {}", first.status)),
                transient: failed.iter().all(|item| item.is_transient()),
            });
        }

        if let Some(reason) = unconfirmed(documents, &response) {
            warn!(index, reason = %reason, "bulk response does not confirm the batch");
            return Err(SyncError::UnconfirmedUpload {
                index: index.to_string(),
                reason,
            });
        }

        debug!(index, count = documents.len(), "bulk upsert applied");
        Ok(documents.len())
    }
}

/// Why `response` falls short of one successful item per document.
fn unconfirmed(documents: &[IndexDocument], response: &BulkResponse) -> Option<String> {
    if response.errors {
        return Some("errors flagged without a rejected item".to_string());
    }
    if response.items.len() != documents.len() {
        return Some(format!(
            "{} items for {} documents",
            response.items.len(),
            documents.len()
        ));
    }

    let confirmed: HashSet<&str> = response.items.iter().map(|item| item.id.as_str()).collect();
    documents
        .iter()
        .map(|doc| doc.id.to_string())
        .find(|id| !confirmed.contains(id.as_str()))
        .map(|id| format!("no item for document {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;
    use uuid::Uuid;

    fn docs(n: u128) -> Vec<IndexDocument> {
        (1..=n)
            .map(|i| IndexDocument {
                id: Uuid::from_u128(i),
                body: json!({"name": format!("doc {i}")}),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_missing_index_is_reported() {
        let index = InMemoryIndex::new();
        let uploader = Uploader::new(Arc::new(index.clone()), 1);

        let err = uploader.ensure_index("genres").await.unwrap_err();
        assert!(matches!(err, SyncError::IndexMissing(ref name) if name == "genres"));

        index.create_index("genres");
        uploader.ensure_index("genres").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let index = InMemoryIndex::new();
        let uploader = Uploader::new(Arc::new(index.clone()), 1);

        assert_eq!(uploader.upload("genres", &[]).await.unwrap(), 0);
        assert_eq!(index.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_fails_batch() {
        let index = InMemoryIndex::with_indices(["genres"]);
        index.reject_id(Uuid::from_u128(2), 400, "mapper_parsing_exception");
        let uploader = Uploader::new(Arc::new(index.clone()), 1);

        let err = uploader.upload("genres", &docs(3)).await.unwrap_err();
        match &err {
            SyncError::PartialUpload {
                failed,
                total,
                first_error,
                transient,
                ..
            } => {
                assert_eq!((*failed, *total), (1, 3));
                assert_eq!(first_error, "mapper_parsing_exception");
                assert!(!transient);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_throttled_items_are_transient() {
        let index = InMemoryIndex::with_indices(["genres"]);
        index.reject_id(Uuid::from_u128(1), 429, "es_rejected_execution_exception");
        let uploader = Uploader::new(Arc::new(index), 1);

        let err = uploader.upload("genres", &docs(2)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    /// Answers every bulk call with the same response.
    struct FixedResponse(BulkResponse);

    #[async_trait]
    impl SearchIndex for FixedResponse {
        async fn index_exists(&self, _index: &str) -> Result<bool> {
            Ok(true)
        }

        async fn bulk_upsert(
            &self,
            _index: &str,
            _documents: &[IndexDocument],
            _retry_on_conflict: u32,
        ) -> Result<BulkResponse> {
            Ok(self.0.clone())
        }
    }

    async fn upload_against(response: BulkResponse, n: u128) -> Result<usize> {
        Uploader::new(Arc::new(FixedResponse(response)), 1)
            .upload("genres", &docs(n))
            .await
    }

    #[tokio::test]
    async fn test_empty_response_is_not_a_success() {
        let err = upload_against(BulkResponse::default(), 2).await.unwrap_err();

        match &err {
            SyncError::UnconfirmedUpload { index, reason } => {
                assert_eq!(index, "genres");
                assert_eq!(reason, "0 items for 2 documents");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_response_must_name_every_document() {
        let stray = BulkResponse::new(vec![
            BulkItem::ok(Uuid::from_u128(1).to_string()),
            BulkItem::ok(Uuid::from_u128(9).to_string()),
        ]);
        let err = upload_against(stray, 2).await.unwrap_err();
        assert!(
            matches!(&err, SyncError::UnconfirmedUpload { reason, .. }
                if reason.contains(&Uuid::from_u128(2).to_string())),
            "{err}"
        );

        let exact = BulkResponse::new(vec![
            BulkItem::ok(Uuid::from_u128(2).to_string()),
            BulkItem::ok(Uuid::from_u128(1).to_string()),
        ]);
        assert_eq!(upload_against(exact, 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_errors_flag_without_rejected_item_fails() {
        let mut response = BulkResponse::new(vec![BulkItem::ok(Uuid::from_u128(1).to_string())]);
        response.errors = true;

        let err = upload_against(response, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::UnconfirmedUpload { .. }));
    }
}
