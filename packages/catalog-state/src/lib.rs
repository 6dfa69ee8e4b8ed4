//! catalog-state - durable run state for catalog sync streams
//!
//! Two primitives keep an incremental sync safe under crashes and overlapping
//! triggers:
//!
//! 1. **CheckpointStore**: per stream, a JSON object of sub-key → timestamp of
//!    the last fully processed record. Advanced only after a batch is
//!    confirmed written; never moves backwards.
//! 2. **LockManager**: per stream, a TTL lease with a fencing token. Renewed
//!    between batches; released on every exit path or left to expire.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catalog_state::infrastructure::redis::{connect, RedisLockManager, RedisStateBackend};
//! use catalog_state::CheckpointStore;
//!
//! let conn = connect("redis://localhost:6379/1").await?;
//! let checkpoints = CheckpointStore::new(Arc::new(RedisStateBackend::new(conn.clone())));
//! let locks = RedisLockManager::new(conn);
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{CheckpointStore, Lease, LeaseGuard, LockManager, StateBackend, StateDocument};
pub use infrastructure::{InMemoryLockManager, InMemoryStateBackend};
