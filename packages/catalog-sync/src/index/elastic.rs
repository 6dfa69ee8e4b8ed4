//! Elasticsearch over its HTTP API (`HEAD /<index>`, `POST /_bulk`)

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{BulkItem, BulkResponse, SearchIndex};
use crate::config::ElasticConfig;
use crate::error::{Result, SyncError};
use crate::models::IndexDocument;

/// Elasticsearch client with round-robin failover across nodes.
#[derive(Clone)]
pub struct ElasticIndex {
    client: Client,
    nodes: Arc<Vec<String>>,
    next_node: Arc<AtomicUsize>,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticIndex {
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ElasticConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .map(|node| node.trim_end_matches('/').to_string())
            .collect();
        Self {
            client,
            nodes: Arc::new(nodes),
            next_node: Arc::new(AtomicUsize::new(0)),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
        }
    }

    /// Send to each node once, starting at the next one in rotation, until
    /// one answers. Only transport failures move on to another node.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        let start = self.next_node.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;

        for offset in 0..self.nodes.len() {
            let node = &self.nodes[(start + offset) % self.nodes.len()];
            let mut request = build(&self.client, node);
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, password.as_ref());
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(node = %node, error = %e, "elasticsearch node unreachable");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(SyncError::IndexTransport(e)),
            None => Err(SyncError::index(None, "no elasticsearch nodes configured")),
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .send(|client, node| client.head(format!("{}/{}", node, index)))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SyncError::index(
                Some(status.as_u16()),
                format!("HEAD /{} returned {}", index, status),
            )),
        }
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[IndexDocument],
        retry_on_conflict: u32,
    ) -> Result<BulkResponse> {
        let body = bulk_body(index, documents, retry_on_conflict)?;
        debug!(index, count = documents.len(), bytes = body.len(), "sending bulk request");

        let response = self
            .send(|client, node| {
                client
                    .post(format!("{}/_bulk", node))
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::index(Some(status.as_u16()), text));
        }
        parse_bulk_response(&text)
    }
}

/// NDJSON body: an `update` action line and a `doc_as_upsert` line per document.
pub fn bulk_body(index: &str, documents: &[IndexDocument], retry_on_conflict: u32) -> Result<String> {
    let mut body = String::new();
    for doc in documents {
        let action = serde_json::json!({
            "update": {
                "_index": index,
                "_id": doc.id.to_string(),
                "retry_on_conflict": retry_on_conflict,
            }
        });
        let source = serde_json::json!({
            "doc": doc.body,
            "doc_as_upsert": true,
        });
        body.push_str(&serde_json::to_string(&action).map_err(SyncError::serialization)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source).map_err(SyncError::serialization)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    errors: bool,
    items: Vec<std::collections::HashMap<String, RawBulkItem>>,
}

#[derive(Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Parse a `_bulk` response into per-item results.
///
/// Every item is kept; one for an action other than `update` counts as failed.
pub fn parse_bulk_response(text: &str) -> Result<BulkResponse> {
    let raw: RawBulkResponse = serde_json::from_str(text).map_err(SyncError::serialization)?;

    let items = raw
        .items
        .into_iter()
        .flat_map(|item| item.into_iter())
        .map(|(action, item)| match item.error {
            _ if action != "update" => BulkItem::failed(
                item.id,
                item.status,
                format!("unexpected bulk action '{}'", action),
            ),
            None => BulkItem {
                id: item.id,
                status: item.status,
                error: None,
            },
            Some(error) => BulkItem::failed(item.id, item.status, describe_error(&error)),
        })
        .collect();

    Ok(BulkResponse {
        errors: raw.errors,
        items,
    })
}

fn describe_error(error: &serde_json::Value) -> String {
    let kind = error.get("type").and_then(|v| v.as_str());
    let reason = error.get("reason").and_then(|v| v.as_str());
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}
