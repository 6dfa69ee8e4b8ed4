use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Result;

/// A held lock slot.
///
/// `fence` is issued from a per-key counter that only grows, so a later
/// holder of the same key always carries a larger token than any earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lock key (e.g. `works_lock`)
    pub key: String,
    /// Random id written as the lock value; ownership checks compare it
    pub owner: Uuid,
    /// Fencing token
    pub fence: u64,
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(key: impl Into<String>, owner: Uuid, fence: u64) -> Self {
        Self {
            key: key.into(),
            owner,
            fence,
            acquired_at: Utc::now(),
        }
    }

    /// Key holding the fencing counter for `key`.
    pub fn fence_key(key: &str) -> String {
        format!("{}:fence", key)
    }
}

/// Distributed TTL lease keyed per stream.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Atomically take `key` if it is free or expired.
    ///
    /// Returns `None` without waiting when another holder's lease is live.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<Lease>>;

    /// Push the expiry of a held lease `ttl` into the future.
    ///
    /// Fails with `ErrorKind::LeaseLost` when the lease expired or was taken
    /// over by another owner.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<()>;

    /// Remove the lease if the caller still owns it.
    ///
    /// Returns `false` when there was nothing of ours to remove.
    async fn release(&self, lease: &Lease) -> Result<bool>;
}

/// Holds a lease until [`LeaseGuard::release`] is awaited.
///
/// If the guard is dropped while still holding (panic, cancelled future), a
/// release is spawned on the current Tokio runtime. Outside a runtime the
/// lease is left to expire.
pub struct LeaseGuard {
    locks: Arc<dyn LockManager>,
    lease: Lease,
    released: bool,
}

impl LeaseGuard {
    pub fn new(locks: Arc<dyn LockManager>, lease: Lease) -> Self {
        Self {
            locks,
            lease,
            released: false,
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub async fn renew(&self, ttl: Duration) -> Result<()> {
        self.locks.renew(&self.lease, ttl).await
    }

    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.locks.release(&self.lease).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let lease = self.lease.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let locks = Arc::clone(&self.locks);
                handle.spawn(async move {
                    match locks.release(&lease).await {
                        Ok(released) => {
                            debug!(key = %lease.key, fence = lease.fence, released, "lease released on drop")
                        }
                        Err(e) => {
                            warn!(key = %lease.key, fence = lease.fence, error = %e, "lease release on drop failed")
                        }
                    }
                });
            }
            Err(_) => {
                warn!(key = %lease.key, fence = lease.fence, "no runtime to release lease; it will expire");
            }
        }
    }
}
