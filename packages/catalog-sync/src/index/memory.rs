use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::{BulkItem, BulkResponse, SearchIndex};
use crate::error::{Result, SyncError};
use crate::models::IndexDocument;

#[derive(Default)]
struct State {
    indices: HashMap<String, BTreeMap<Uuid, serde_json::Value>>,
    rejected: HashMap<Uuid, (u16, String)>,
    unreachable: bool,
    bulk_calls: usize,
}

/// Search index held in memory, with the same merge semantics as a
/// partial-document update with `doc_as_upsert`.
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    state: Arc<Mutex<State>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indices<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let index = Self::new();
        for name in names {
            index.create_index(name);
        }
        index
    }

    pub fn create_index(&self, name: &str) {
        self.state.lock().indices.entry(name.to_string()).or_default();
    }

    /// Reject every write of `id` with `status`.
    pub fn reject_id(&self, id: Uuid, status: u16, error: &str) {
        self.state
            .lock()
            .rejected
            .insert(id, (status, error.to_string()));
    }

    pub fn clear_rejections(&self) {
        self.state.lock().rejected.clear();
    }

    /// Fail every call as if the cluster could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn document(&self, index: &str, id: Uuid) -> Option<serde_json::Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(&id).cloned())
    }

    pub fn documents(&self, index: &str) -> BTreeMap<Uuid, serde_json::Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn bulk_calls(&self) -> usize {
        self.state.lock().bulk_calls
    }

    fn check_reachable(state: &State) -> Result<()> {
        if state.unreachable {
            return Err(SyncError::index(None, "connection refused"));
        }
        Ok(())
    }
}

fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value);
                        continue;
                    }
                    _ => {}
                }
                target.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        Ok(state.indices.contains_key(index))
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[IndexDocument],
        _retry_on_conflict: u32,
    ) -> Result<BulkResponse> {
        let mut state = self.state.lock();
        Self::check_reachable(&state)?;
        state.bulk_calls += 1;

        let State {
            indices, rejected, ..
        } = &mut *state;
        let Some(docs) = indices.get_mut(index) else {
            return Err(SyncError::index(Some(404), format!("no such index [{}]", index)));
        };

        let items = documents
            .iter()
            .map(|doc| {
                if let Some((status, error)) = rejected.get(&doc.id) {
                    return BulkItem::failed(doc.id.to_string(), *status, error.clone());
                }
                merge(
                    docs.entry(doc.id).or_insert_with(|| serde_json::json!({})),
                    &doc.body,
                );
                BulkItem::ok(doc.id.to_string())
            })
            .collect();

        Ok(BulkResponse::new(items))
    }
}
