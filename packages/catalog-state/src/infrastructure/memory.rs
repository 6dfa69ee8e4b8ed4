//! In-memory state adapters
//!
//! Same semantics as the Redis adapters, scoped to one process. Lease expiry
//! uses the Tokio clock so tests can drive it with `tokio::time::pause`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{Lease, LockManager, StateBackend, StateDocument};
use crate::{Result, StorageError};

/// State documents kept as serialized JSON, like the Redis backend stores them.
#[derive(Default, Clone)]
pub struct InMemoryStateBackend {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON stored for `record`.
    pub fn raw(&self, record: &str) -> Option<String> {
        self.records.lock().get(record).cloned()
    }

    /// Overwrite `record` with raw JSON (seeding legacy state in tests).
    pub fn put_raw(&self, record: &str, json: &str) {
        self.records
            .lock()
            .insert(record.to_string(), json.to_string());
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn retrieve(&self, record: &str) -> Result<StateDocument> {
        match self.records.lock().get(record) {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(StateDocument::new()),
        }
    }

    async fn save(&self, record: &str, state: &StateDocument) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        self.records.lock().insert(record.to_string(), raw);
        Ok(())
    }

    async fn clear(&self, record: &str) -> Result<()> {
        self.records.lock().remove(record);
        Ok(())
    }
}

struct HeldLease {
    owner: Uuid,
    expires_at: Instant,
}

#[derive(Default)]
struct LockTable {
    held: HashMap<String, HeldLease>,
    fences: HashMap<String, u64>,
}

impl LockTable {
    fn live(&self, key: &str, now: Instant) -> Option<&HeldLease> {
        self.held.get(key).filter(|lease| lease.expires_at > now)
    }
}

/// Lease table guarded by a single mutex.
#[derive(Default, Clone)]
pub struct InMemoryLockManager {
    table: Arc<Mutex<LockTable>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_held(&self, key: &str) -> bool {
        self.table.lock().live(key, Instant::now()).is_some()
    }

    /// Last fencing token issued for `key` (0 if never acquired).
    pub fn last_fence(&self, key: &str) -> u64 {
        self.table.lock().fences.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<Lease>> {
        let now = Instant::now();
        let mut table = self.table.lock();

        if table.live(key, now).is_some() {
            return Ok(None);
        }

        let fence = {
            let counter = table.fences.entry(key.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let owner = Uuid::new_v4();
        table.held.insert(
            key.to_string(),
            HeldLease {
                owner,
                expires_at: now + ttl,
            },
        );

        Ok(Some(Lease::new(key, owner, fence)))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut table = self.table.lock();

        match table.held.get_mut(&lease.key) {
            Some(held) if held.owner == lease.owner && held.expires_at > now => {
                held.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(StorageError::lease_lost(&lease.key)),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut table = self.table.lock();

        match table.held.get(&lease.key) {
            Some(held) if held.owner == lease.owner => {
                table.held.remove(&lease.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
