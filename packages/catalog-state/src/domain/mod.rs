//! Domain layer for sync run state
//!
//! # Core Principles
//!
//! 1. **One writer per stream**: a stream's checkpoint record is only written
//!    while the stream's lease is held.
//! 2. **Checkpoints only move forward**: `set` keeps the later of the stored
//!    and the offered timestamp.
//! 3. **Leases expire**: a crashed holder blocks its stream for at most one TTL.
//!
//! # Domain Models
//!
//! - `StateDocument`: one JSON object per checkpoint record (sub-key → ISO-8601)
//! - `Lease`: a held lock slot with its owner id and fencing token
//!
//! # Port Traits
//!
//! - `StateBackend`: raw persistence of state documents
//! - `LockManager`: fenced TTL leases (held through a `LeaseGuard`)
//!
//! # Examples
//!
//! ```rust,ignore
//! use catalog_state::{CheckpointStore, LockManager};
//!
//! async fn example(store: CheckpointStore, locks: impl LockManager) -> Result<()> {
//!     let Some(lease) = locks.acquire("works_lock", ttl).await? else {
//!         return Ok(()); // previous run still in flight
//!     };
//!     let since = store.get("works_sync", "works_last_check").await?;
//!     // ... upload everything after `since` ...
//!     locks.renew(&lease, ttl).await?;
//!     store.set("works_sync", "works_last_check", last_modified).await?;
//!     locks.release(&lease).await?;
//!     Ok(())
//! }
//! ```

mod checkpoint;
mod lease;

pub use checkpoint::{CheckpointStore, StateBackend, StateDocument};
pub use lease::{Lease, LeaseGuard, LockManager};
