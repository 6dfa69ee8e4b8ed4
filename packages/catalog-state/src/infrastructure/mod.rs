//! Infrastructure layer - state adapters
//!
//! - `memory`: single-process backends (tests, local runs)
//! - `redis`: shared backends for multi-process deployments

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryLockManager, InMemoryStateBackend};

#[cfg(feature = "redis")]
pub use self::redis::{RedisLockManager, RedisStateBackend};
