//! Distributed locking over the key-value store
//!
//! Mutual exclusion between worker processes that share nothing but the
//! store. One lock per knowledge base guards the graph fetch-merge-persist
//! cycle.
//!
//! # Lifecycle
//!
//! `Unlocked -> Acquiring -> Held -> Unlocked`, or `Acquiring -> Failed`
//! once the acquisition timeout elapses. A held record also disappears on
//! its own when the TTL runs out.
//!
//! # Example
//!
//! ```ignore
//! use kgsync_core::lock::LockManager;
//!
//! let manager = LockManager::with_defaults(client);
//! let merged = manager
//!     .lock_for(&kb_id)
//!     .scoped(|| async { merge_and_persist().await })
//!     .await?;
//! ```

pub mod backoff;
pub mod distributed;
pub mod guard;
pub mod manager;
pub mod types;

pub use backoff::BackoffPolicy;
pub use distributed::DistributedLock;
pub use guard::LockGuard;
pub use manager::LockManager;
pub use types::{LockConfig, LockError, LockResult, LockState, LockStatus};
